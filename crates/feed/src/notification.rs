use serde::{Deserialize, Serialize};

use crate::events::Alert;
use crate::message::{ConversationId, Message, UserId};

/// Which inbound messages may raise an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationScope {
    /// Only messages for the open conversation.
    ActiveOnly,
    /// Any conversation; a global "someone is talking" ping.
    #[default]
    Global,
}

/// Facts about the viewer the policy needs at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationContext {
    pub active_conversation_id: Option<ConversationId>,
    pub current_user_id: UserId,
    /// Browsers refuse audio before the first user gesture; this tracks that gesture.
    pub has_user_interacted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationPolicy {
    #[serde(default)]
    pub scope: NotificationScope,
}

impl NotificationPolicy {
    pub const fn new(scope: NotificationScope) -> Self {
        Self { scope }
    }

    /// Returns an alert for `message` when the viewer should be pinged.
    ///
    /// Own messages echoed back by the channel never alert.
    pub fn evaluate(&self, message: &Message, context: &NotificationContext) -> Option<Alert> {
        if message.author_id == context.current_user_id || !context.has_user_interacted {
            return None;
        }

        let in_scope = match self.scope {
            NotificationScope::Global => true,
            NotificationScope::ActiveOnly => {
                context.active_conversation_id == Some(message.parent_id)
            }
        };

        in_scope.then_some(Alert {
            parent_id: message.parent_id,
            message_id: message.id,
        })
    }
}
