use std::fmt;

use huddle_api::ApiError;
use snafu::Snafu;

/// Coarse classification the host uses to pick inline message, toast, or banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Permission,
    Network,
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchHistory,
    SendMessage,
    DeleteMessage,
    UploadAttachment,
    Subscribe,
}

impl fmt::Display for Operation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FetchHistory => "loading history",
            Self::SendMessage => "sending the message",
            Self::DeleteMessage => "deleting the message",
            Self::UploadAttachment => "uploading the attachment",
            Self::Subscribe => "subscribing to live updates",
        };
        formatter.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    View,
    Post,
    Delete,
}

impl fmt::Display for Capability {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::View => "view this conversation",
            Self::Post => "post in this conversation",
            Self::Delete => "delete messages",
        };
        formatter.write_str(label)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FeedError {
    #[snafu(display("message cannot be empty"))]
    EmptyBody { stage: &'static str },
    #[snafu(display("you are not allowed to {capability}"))]
    PermissionDenied {
        stage: &'static str,
        capability: Capability,
    },
    #[snafu(display("{operation} failed on `{stage}`: {source}"))]
    Network {
        stage: &'static str,
        operation: Operation,
        source: ApiError,
    },
    #[snafu(display("invalid {entity} payload on `{stage}`: {details}"))]
    InvalidPayload {
        stage: &'static str,
        entity: &'static str,
        details: String,
    },
    #[snafu(display("no conversation is open"))]
    PanelClosed { stage: &'static str },
    #[snafu(display("{operation} is already in progress"))]
    Busy {
        stage: &'static str,
        operation: Operation,
    },
    #[snafu(display("feed session has shut down"))]
    SessionClosed { stage: &'static str },
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyBody { .. } => ErrorKind::Validation,
            Self::PermissionDenied { .. } => ErrorKind::Permission,
            Self::Network { .. } | Self::InvalidPayload { .. } => ErrorKind::Network,
            Self::PanelClosed { .. } | Self::Busy { .. } | Self::SessionClosed { .. } => {
                ErrorKind::State
            }
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::EmptyBody { stage }
            | Self::PermissionDenied { stage, .. }
            | Self::Network { stage, .. }
            | Self::InvalidPayload { stage, .. }
            | Self::PanelClosed { stage }
            | Self::Busy { stage, .. }
            | Self::SessionClosed { stage } => stage,
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
