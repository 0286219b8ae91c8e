//! Validation of loosely typed API and channel payloads before they reach feed state.

use huddle_api::{HistoryResponse, WireAttachment, WireChannelEvent, WireMessage};
use snafu::ensure;

use crate::error::{FeedError, FeedResult, InvalidPayloadSnafu};
use crate::events::ChannelEvent;
use crate::message::{Attachment, ConversationId, Message, MessageId, UserId};

/// One validated history page, newest first.
///
/// `fetched` and `oldest_wire_id` describe the raw page, skipped rows included, so paging
/// can move past a page whose rows were all rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub items: Vec<Message>,
    pub total: u64,
    pub fetched: usize,
    pub oldest_wire_id: Option<MessageId>,
}

impl HistoryPage {
    /// Page with no skipped rows.
    pub fn new(items: Vec<Message>, total: u64) -> Self {
        let oldest_wire_id = items.iter().map(|message| message.id).min();
        Self {
            fetched: items.len(),
            oldest_wire_id,
            items,
            total,
        }
    }
}

impl From<WireAttachment> for Attachment {
    fn from(wire: WireAttachment) -> Self {
        Self {
            name: wire.name,
            url: wire.url,
            mime_type: wire.mime_type,
            size_bytes: wire.size_bytes,
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = FeedError;

    fn try_from(wire: WireMessage) -> FeedResult<Self> {
        ensure!(
            wire.id != 0 && wire.parent_id != 0,
            InvalidPayloadSnafu {
                stage: "validate-message-ids",
                entity: "message",
                details: format!("id={} parentId={}", wire.id, wire.parent_id),
            }
        );

        let body = wire.body.unwrap_or_default();
        ensure!(
            !body.trim().is_empty() || !wire.attachments.is_empty(),
            InvalidPayloadSnafu {
                stage: "validate-message-content",
                entity: "message",
                details: format!("message {} has neither body nor attachments", wire.id),
            }
        );

        let author_name = wire
            .author_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("User {}", wire.author_id));

        Ok(Self {
            id: MessageId::new(wire.id),
            parent_id: ConversationId::new(wire.parent_id),
            author_id: UserId::new(wire.author_id),
            author_name,
            body,
            attachments: wire.attachments.into_iter().map(Attachment::from).collect(),
            created_at_unix_seconds: wire.created_at.unwrap_or_default(),
        })
    }
}

impl TryFrom<WireChannelEvent> for ChannelEvent {
    type Error = FeedError;

    fn try_from(wire: WireChannelEvent) -> FeedResult<Self> {
        match wire {
            WireChannelEvent::NewMessage { message } => {
                Message::try_from(message).map(ChannelEvent::NewMessage)
            }
            WireChannelEvent::MessageDeleted { id, parent_id } => {
                ensure!(
                    id != 0 && parent_id != 0,
                    InvalidPayloadSnafu {
                        stage: "validate-message-deleted",
                        entity: "channel event",
                        details: format!("id={id} parentId={parent_id}"),
                    }
                );
                Ok(ChannelEvent::MessageDeleted {
                    id: MessageId::new(id),
                    parent_id: ConversationId::new(parent_id),
                })
            }
        }
    }
}

/// Converts a history response for `parent_id`.
///
/// Entries that fail validation or belong to another conversation are skipped so one bad
/// row cannot block the rest of the page.
pub fn history_page_from_wire(response: HistoryResponse, parent_id: ConversationId) -> HistoryPage {
    let fetched = response.items.len();
    let oldest_wire_id = response
        .items
        .iter()
        .map(|wire| wire.id)
        .filter(|id| *id != 0)
        .min()
        .map(MessageId::new);
    let mut items = Vec::with_capacity(fetched);

    for wire in response.items {
        let wire_id = wire.id;
        match Message::try_from(wire) {
            Ok(message) if message.parent_id == parent_id => items.push(message),
            Ok(message) => {
                tracing::warn!(
                    message_id = wire_id,
                    expected_parent_id = %parent_id,
                    actual_parent_id = %message.parent_id,
                    "skipping history entry from another conversation"
                );
            }
            Err(error) => {
                tracing::warn!(message_id = wire_id, %error, "skipping invalid history entry");
            }
        }
    }

    items.sort_by(|left, right| right.recency_cmp(left));

    HistoryPage {
        items,
        total: response.meta.total,
        fetched,
        oldest_wire_id,
    }
}
