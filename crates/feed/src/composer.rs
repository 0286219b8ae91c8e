use crate::mention;
use crate::message::UserId;

/// Hint shown under the composer. Send is Shift+Enter here, not plain Enter.
pub const COMPOSER_HINT: &str = "Press Shift + Enter to send. Enter adds a new line.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Shift,
    Enter,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEvent {
    Down(Key),
    Up(Key),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyState {
    #[default]
    Idle,
    ShiftHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComposerAction {
    None,
    InsertNewline,
    Submit,
}

/// Draft text plus the modifier tracking that decides what Enter does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    text: String,
    keys: KeyState,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn key_state(&self) -> KeyState {
        self.keys
    }

    pub fn hint(&self) -> &'static str {
        COMPOSER_HINT
    }

    /// Appends a structured mention token for `user_id`.
    pub fn insert_mention(&mut self, display_name: &str, user_id: UserId) {
        if !self.text.is_empty() && !self.text.ends_with(char::is_whitespace) {
            self.text.push(' ');
        }
        self.text
            .push_str(&mention::encode_token(display_name, user_id));
        self.text.push(' ');
    }

    pub fn handle_key(&mut self, event: KeyEvent) -> ComposerAction {
        match (self.keys, event) {
            (_, KeyEvent::Down(Key::Shift)) => {
                self.keys = KeyState::ShiftHeld;
                ComposerAction::None
            }
            (_, KeyEvent::Up(Key::Shift)) => {
                self.keys = KeyState::Idle;
                ComposerAction::None
            }
            (KeyState::ShiftHeld, KeyEvent::Down(Key::Enter)) => ComposerAction::Submit,
            (KeyState::Idle, KeyEvent::Down(Key::Enter)) => {
                self.text.push('\n');
                ComposerAction::InsertNewline
            }
            (_, KeyEvent::Down(Key::Other))
            | (_, KeyEvent::Up(Key::Enter))
            | (_, KeyEvent::Up(Key::Other)) => ComposerAction::None,
        }
    }

    /// Drops modifier tracking, e.g. when focus leaves the page mid-chord.
    pub fn reset_keys(&mut self) {
        self.keys = KeyState::Idle;
    }
}
