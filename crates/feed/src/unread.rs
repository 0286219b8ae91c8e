use std::collections::BTreeMap;

use crate::message::ConversationId;

/// Per-conversation count of messages from others that arrived while elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadCounts {
    counts: BTreeMap<ConversationId, u32>,
}

impl UnreadCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, conversation_id: ConversationId) -> u32 {
        let count = self.counts.entry(conversation_id).or_default();
        *count = count.saturating_add(1);
        *count
    }

    pub fn clear(&mut self, conversation_id: ConversationId) {
        self.counts.remove(&conversation_id);
    }

    pub fn get(&self, conversation_id: ConversationId) -> u32 {
        self.counts.get(&conversation_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts
            .values()
            .fold(0_u32, |sum, count| sum.saturating_add(*count))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConversationId, u32)> + '_ {
        self.counts.iter().map(|(id, count)| (*id, *count))
    }
}
