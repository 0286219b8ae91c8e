use crate::events::{BackgroundNotice, ChannelEvent, preview_text};
use crate::message::{ConversationId, Message, MessageId};

pub const DEFAULT_PREVIEW_CHARS: usize = 80;

/// Identifier of one subscription lifetime.
///
/// Must change on every subscribe so events from an older subscription are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionGeneration(pub u64);

impl SubscriptionGeneration {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Unsubscribed,
    Subscribed(SubscriptionGeneration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTransition {
    Subscribe(SubscriptionGeneration),
    Unsubscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTransitionRejection {
    AlreadySubscribed { active: SubscriptionGeneration },
    NotSubscribed,
}

pub type ChannelTransitionResult = Result<ChannelState, ChannelTransitionRejection>;

impl ChannelState {
    pub fn active_generation(&self) -> Option<SubscriptionGeneration> {
        match self {
            Self::Subscribed(generation) => Some(*generation),
            Self::Unsubscribed => None,
        }
    }

    /// Returns true when an event tagged `generation` belongs to the live subscription.
    pub fn accepts_event(&self, generation: SubscriptionGeneration) -> bool {
        matches!(self, Self::Subscribed(active) if *active == generation)
    }

    pub fn apply(&self, transition: ChannelTransition) -> ChannelTransitionResult {
        match (self, transition) {
            (Self::Subscribed(active), ChannelTransition::Subscribe(_)) => {
                Err(ChannelTransitionRejection::AlreadySubscribed { active: *active })
            }
            (Self::Unsubscribed, ChannelTransition::Subscribe(generation)) => {
                Ok(Self::Subscribed(generation))
            }
            (Self::Subscribed(_), ChannelTransition::Unsubscribe) => Ok(Self::Unsubscribed),
            (Self::Unsubscribed, ChannelTransition::Unsubscribe) => {
                Err(ChannelTransitionRejection::NotSubscribed)
            }
        }
    }
}

/// Where one accepted channel event goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Merge as newer into the active feed.
    Append(Message),
    /// Drop from the active feed.
    Remove(MessageId),
    /// Leave the active feed alone and tell the host about another conversation.
    Background(BackgroundNotice),
    /// Deletions in conversations that are not open have nothing to update.
    Ignore,
}

/// Classifies push events by target conversation.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    state: ChannelState,
    last_generation: u64,
    preview_chars: usize,
}

impl ChannelRouter {
    pub fn new(preview_chars: usize) -> Self {
        Self {
            state: ChannelState::Unsubscribed,
            last_generation: 0,
            preview_chars: preview_chars.max(1),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.active_generation().is_some()
    }

    /// Moves to `Subscribed` under a fresh generation. Rejected while already subscribed.
    pub fn subscribe(&mut self) -> Result<SubscriptionGeneration, ChannelTransitionRejection> {
        let generation = SubscriptionGeneration::new(self.last_generation.saturating_add(1));
        self.state = self.state.apply(ChannelTransition::Subscribe(generation))?;
        self.last_generation = generation.0;
        tracing::info!(generation = generation.0, "push channel subscribed");
        Ok(generation)
    }

    pub fn unsubscribe(&mut self) -> Result<SubscriptionGeneration, ChannelTransitionRejection> {
        let active = self
            .state
            .active_generation()
            .ok_or(ChannelTransitionRejection::NotSubscribed)?;
        self.state = self.state.apply(ChannelTransition::Unsubscribe)?;
        tracing::info!(generation = active.0, "push channel unsubscribed");
        Ok(active)
    }

    /// Routes `event`, or returns `None` when it comes from a superseded subscription.
    pub fn route(
        &self,
        generation: SubscriptionGeneration,
        event: ChannelEvent,
        active_conversation_id: ConversationId,
    ) -> Option<Route> {
        if !self.state.accepts_event(generation) {
            tracing::debug!(
                generation = generation.0,
                active = ?self.state.active_generation(),
                "dropping event from superseded subscription"
            );
            return None;
        }

        let route = match event {
            ChannelEvent::NewMessage(message) if message.parent_id == active_conversation_id => {
                Route::Append(message)
            }
            ChannelEvent::NewMessage(message) => Route::Background(BackgroundNotice {
                parent_id: message.parent_id,
                author: message.author_name.clone(),
                preview: self.preview(&message),
            }),
            ChannelEvent::MessageDeleted { id, parent_id } if parent_id == active_conversation_id => {
                Route::Remove(id)
            }
            ChannelEvent::MessageDeleted { .. } => Route::Ignore,
        };

        Some(route)
    }

    fn preview(&self, message: &Message) -> String {
        if message.body.trim().is_empty()
            && let Some(attachment) = message.attachments.first()
        {
            return preview_text(&format!("sent {}", attachment.name), self.preview_chars);
        }

        preview_text(&message.body, self.preview_chars)
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_CHARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Attachment, UserId};

    fn message(id: u64, parent: u64) -> Message {
        Message::new(
            MessageId::new(id),
            ConversationId::new(parent),
            UserId::new(2),
            "status update for the night shift",
        )
        .with_author_name("Grace")
    }

    #[test]
    fn subscribe_happens_exactly_once() {
        let mut router = ChannelRouter::default();
        let generation = router.subscribe().expect("first subscribe");

        assert_eq!(
            router.subscribe(),
            Err(ChannelTransitionRejection::AlreadySubscribed { active: generation })
        );
        assert_eq!(router.state(), ChannelState::Subscribed(generation));
    }

    #[test]
    fn each_subscription_gets_a_new_generation() {
        let mut router = ChannelRouter::default();
        let first = router.subscribe().expect("subscribe");
        router.unsubscribe().expect("unsubscribe");
        let second = router.subscribe().expect("subscribe again");

        assert_ne!(first, second);
        assert!(
            router
                .route(
                    first,
                    ChannelEvent::NewMessage(message(1, 3)),
                    ConversationId::new(3)
                )
                .is_none()
        );
    }

    #[test]
    fn unsubscribe_without_subscription_is_rejected() {
        let mut router = ChannelRouter::default();
        assert_eq!(
            router.unsubscribe(),
            Err(ChannelTransitionRejection::NotSubscribed)
        );
    }

    #[test]
    fn events_after_unsubscribe_are_dropped() {
        let mut router = ChannelRouter::default();
        let generation = router.subscribe().expect("subscribe");
        router.unsubscribe().expect("unsubscribe");

        let route = router.route(
            generation,
            ChannelEvent::NewMessage(message(1, 3)),
            ConversationId::new(3),
        );
        assert_eq!(route, None);
    }

    #[test]
    fn active_conversation_messages_append() {
        let mut router = ChannelRouter::default();
        let generation = router.subscribe().expect("subscribe");

        let route = router.route(
            generation,
            ChannelEvent::NewMessage(message(1, 3)),
            ConversationId::new(3),
        );
        assert_eq!(route, Some(Route::Append(message(1, 3))));
    }

    #[test]
    fn other_conversation_messages_become_background_notices() {
        let mut router = ChannelRouter::new(12);
        let generation = router.subscribe().expect("subscribe");

        let route = router.route(
            generation,
            ChannelEvent::NewMessage(message(1, 7)),
            ConversationId::new(3),
        );
        assert_eq!(
            route,
            Some(Route::Background(BackgroundNotice {
                parent_id: ConversationId::new(7),
                author: "Grace".to_string(),
                preview: "status upda…".to_string(),
            }))
        );
    }

    #[test]
    fn attachment_only_preview_names_the_file() {
        let mut router = ChannelRouter::default();
        let generation = router.subscribe().expect("subscribe");
        let mut upload = message(1, 7);
        upload.body.clear();
        let upload = upload.with_attachment(Attachment {
            name: "roster.xlsx".to_string(),
            url: "loopback://roster.xlsx".to_string(),
            mime_type: None,
            size_bytes: None,
        });

        let Some(Route::Background(notice)) = router.route(
            generation,
            ChannelEvent::NewMessage(upload),
            ConversationId::new(3),
        ) else {
            panic!("expected background notice");
        };
        assert_eq!(notice.preview, "sent roster.xlsx");
    }

    #[test]
    fn deletions_only_touch_the_active_conversation() {
        let mut router = ChannelRouter::default();
        let generation = router.subscribe().expect("subscribe");
        let active = ConversationId::new(3);

        let here = ChannelEvent::MessageDeleted {
            id: MessageId::new(4),
            parent_id: active,
        };
        let elsewhere = ChannelEvent::MessageDeleted {
            id: MessageId::new(5),
            parent_id: ConversationId::new(7),
        };

        assert_eq!(
            router.route(generation, here, active),
            Some(Route::Remove(MessageId::new(4)))
        );
        assert_eq!(
            router.route(generation, elsewhere, active),
            Some(Route::Ignore)
        );
    }
}
