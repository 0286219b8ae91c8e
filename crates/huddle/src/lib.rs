#![deny(unsafe_code)]

/// Line-oriented shell that drives a feed session.
pub mod console;
/// Settings persistence.
pub mod settings;
