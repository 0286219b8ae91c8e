use std::collections::HashSet;

use crate::message::{Message, MessageId};

/// Where a batch lands relative to the messages already in a newest-first feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergePosition {
    /// Appended after existing items (history pages).
    Older,
    /// Prepended before existing items (pushes, created messages).
    Newer,
}

/// Combines `incoming` into `existing` without ever duplicating an id.
///
/// Entries of `incoming` whose id is already present, or repeated earlier in `incoming`,
/// are dropped; the rest keep their relative order. Merging the same batch twice yields the
/// same feed as merging it once.
pub fn merge(existing: &[Message], incoming: &[Message], position: MergePosition) -> Vec<Message> {
    let mut merged = existing.to_vec();
    merge_into(&mut merged, incoming.iter().cloned(), position);
    merged
}

/// In-place form of [`merge`]. Returns the number of entries that were actually added.
pub fn merge_into(
    items: &mut Vec<Message>,
    incoming: impl IntoIterator<Item = Message>,
    position: MergePosition,
) -> usize {
    let mut seen = items
        .iter()
        .map(|message| message.id)
        .collect::<HashSet<MessageId>>();
    let fresh = incoming
        .into_iter()
        .filter(|message| seen.insert(message.id))
        .collect::<Vec<_>>();
    let added = fresh.len();

    match position {
        MergePosition::Older => items.extend(fresh),
        MergePosition::Newer => {
            items.splice(0..0, fresh);
        }
    }

    added
}

/// Removes the entry with `id`, if any.
pub fn remove(items: &mut Vec<Message>, id: MessageId) -> Option<Message> {
    let index = items.iter().position(|message| message.id == id)?;
    Some(items.remove(index))
}

pub fn has_unique_ids(items: &[Message]) -> bool {
    let mut seen = HashSet::with_capacity(items.len());
    items.iter().all(|message| seen.insert(message.id))
}
