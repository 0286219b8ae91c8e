use crate::error::ErrorKind;
use crate::message::{ConversationId, Message, MessageId};

/// Validated push channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    NewMessage(Message),
    MessageDeleted {
        id: MessageId,
        parent_id: ConversationId,
    },
}

impl ChannelEvent {
    pub fn parent_id(&self) -> ConversationId {
        match self {
            Self::NewMessage(message) => message.parent_id,
            Self::MessageDeleted { parent_id, .. } => *parent_id,
        }
    }
}

/// Cross-conversation notice the host renders as a toast linking to `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundNotice {
    pub parent_id: ConversationId,
    pub author: String,
    pub preview: String,
}

/// Request for an audible/visual ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Alert {
    pub parent_id: ConversationId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfacedError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Host-facing side effects, drained in the order they were produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelNotice {
    Alert(Alert),
    Background(BackgroundNotice),
    Error(SurfacedError),
}

impl PanelNotice {
    pub fn as_background(&self) -> Option<&BackgroundNotice> {
        match self {
            Self::Background(notice) => Some(notice),
            Self::Alert(_) | Self::Error(_) => None,
        }
    }

    pub fn as_alert(&self) -> Option<Alert> {
        match self {
            Self::Alert(alert) => Some(*alert),
            Self::Background(_) | Self::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&SurfacedError> {
        match self {
            Self::Error(error) => Some(error),
            Self::Alert(_) | Self::Background(_) => None,
        }
    }
}

/// Builds a single-line preview of at most `max_chars` characters.
pub fn preview_text(body: &str, max_chars: usize) -> String {
    let flattened = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }

    let mut preview = flattened
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    preview.push('…');
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_preview_is_unchanged_apart_from_whitespace() {
        assert_eq!(preview_text("hi\n  there", 80), "hi there");
    }

    #[test]
    fn long_preview_is_truncated_on_char_boundary() {
        let preview = preview_text("ééééé", 4);
        assert_eq!(preview, "ééé…");
        assert_eq!(preview.chars().count(), 4);
    }
}
