use crate::merge::{self, MergePosition};
use crate::message::{Message, MessageId};

/// Ordered, deduplicated messages of the open conversation, newest first.
///
/// Every mutation goes through a method here so `has_more == items.len() < total` holds
/// after each one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedState {
    items: Vec<Message>,
    total: u64,
    has_more: bool,
    loading: bool,
    /// Ids merged live while a refresh is in flight.
    live_since_refresh: Option<Vec<MessageId>>,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty feed for a conversation whose size is already known.
    pub fn with_total(total: u64) -> Self {
        let mut state = Self {
            total,
            ..Self::default()
        };
        state.recount();
        state
    }

    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Boundary marker for the next older page.
    pub fn oldest(&self) -> Option<&Message> {
        self.items.last()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.items.first()
    }

    pub(crate) fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Appends an older history page and adopts the server's total.
    pub(crate) fn apply_older_page(&mut self, page: Vec<Message>, total: u64) -> usize {
        let added = merge::merge_into(&mut self.items, page, MergePosition::Older);
        self.total = total;
        self.recount();
        added
    }

    pub(crate) fn begin_refresh(&mut self) {
        self.live_since_refresh = Some(Vec::new());
    }

    pub(crate) fn end_refresh(&mut self) {
        self.live_since_refresh = None;
    }

    /// Replaces the loaded window with a fresh first page.
    ///
    /// Loaded messages newer than the page head survive, as do messages merged live since
    /// [`FeedState::begin_refresh`]. Both arrived after the server produced the page.
    pub(crate) fn replace_with_first_page(&mut self, page: Vec<Message>, total: u64) -> usize {
        let head = page.first().cloned();
        let live = self.live_since_refresh.take().unwrap_or_default();
        let raced = std::mem::take(&mut self.items)
            .into_iter()
            .filter(|message| {
                live.contains(&message.id)
                    || head.as_ref().is_some_and(|head| message.is_newer_than(head))
            })
            .collect::<Vec<_>>();

        merge::merge_into(&mut self.items, page, MergePosition::Older);
        let kept = merge::merge_into(&mut self.items, raced, MergePosition::Newer);
        self.total = total.saturating_add(kept as u64);
        self.recount();
        kept
    }

    /// Prepends one live or locally created message. Returns false for a duplicate.
    pub(crate) fn apply_newer(&mut self, message: Message) -> bool {
        let id = message.id;
        let added = merge::merge_into(&mut self.items, [message], MergePosition::Newer);
        if added > 0
            && let Some(live) = self.live_since_refresh.as_mut()
        {
            live.push(id);
        }
        self.total = self.total.saturating_add(added as u64);
        self.recount();
        added > 0
    }

    pub(crate) fn remove(&mut self, id: MessageId) -> bool {
        let removed = merge::remove(&mut self.items, id).is_some();
        if removed {
            self.total = self.total.saturating_sub(1);
        }
        self.recount();
        removed
    }

    /// Adopts the loaded count as the total once the server has nothing older to give.
    pub(crate) fn settle_total(&mut self) {
        self.total = self.items.len() as u64;
        self.recount();
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    fn recount(&mut self) {
        self.has_more = (self.items.len() as u64) < self.total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ConversationId, UserId};

    fn message(id: u64, created_at: u64) -> Message {
        Message::new(
            MessageId::new(id),
            ConversationId::new(3),
            UserId::new(2),
            "text",
        )
        .with_created_at(created_at)
    }

    fn ids(state: &FeedState) -> Vec<u64> {
        state.items().iter().map(|message| message.id.0).collect()
    }

    fn assert_has_more_consistent(state: &FeedState) {
        assert_eq!(state.has_more(), (state.len() as u64) < state.total());
    }

    #[test]
    fn has_more_tracks_every_mutation() {
        let mut state = FeedState::with_total(3);
        assert!(state.has_more());

        state.apply_older_page(vec![message(5, 50), message(4, 40)], 3);
        assert_has_more_consistent(&state);
        assert!(state.has_more());

        assert!(state.apply_newer(message(6, 60)));
        assert_eq!(state.total(), 4);
        assert_has_more_consistent(&state);

        assert!(!state.apply_newer(message(6, 60)));
        assert_eq!(state.total(), 4);

        assert!(state.remove(MessageId::new(5)));
        assert_eq!(state.total(), 3);
        assert_has_more_consistent(&state);

        state.apply_older_page(vec![message(3, 30)], 3);
        assert!(!state.has_more());
        assert_has_more_consistent(&state);
    }

    #[test]
    fn refresh_keeps_messages_that_raced_ahead_of_the_page() {
        let mut state = FeedState::new();
        state.apply_older_page(vec![message(4, 40), message(3, 30), message(2, 20)], 10);
        state.apply_newer(message(9, 90));

        let kept = state.replace_with_first_page(vec![message(5, 50), message(4, 40)], 6);

        assert_eq!(kept, 1);
        assert_eq!(ids(&state), vec![9, 5, 4]);
        assert_eq!(state.total(), 7);
        assert_has_more_consistent(&state);
    }

    #[test]
    fn refresh_with_empty_page_clears_the_window() {
        let mut state = FeedState::new();
        state.apply_older_page(vec![message(2, 20)], 1);

        state.replace_with_first_page(Vec::new(), 0);

        assert!(state.is_empty());
        assert!(!state.has_more());
    }

    #[test]
    fn live_arrival_during_refresh_survives_an_empty_page() {
        let mut state = FeedState::new();
        state.begin_refresh();
        assert!(state.apply_newer(message(5, 50)));

        state.replace_with_first_page(Vec::new(), 0);

        assert_eq!(ids(&state), vec![5]);
        assert_eq!(state.total(), 1);
        assert!(!state.has_more());
    }

    #[test]
    fn refresh_drops_old_window_but_keeps_live_arrivals() {
        let mut state = FeedState::new();
        state.apply_older_page(vec![message(4, 40), message(3, 30)], 2);
        state.begin_refresh();
        state.apply_newer(message(8, 35));

        state.replace_with_first_page(vec![message(6, 60)], 1);

        assert_eq!(ids(&state), vec![8, 6]);
        assert_eq!(state.total(), 2);
        assert_has_more_consistent(&state);

        state.replace_with_first_page(vec![message(6, 60)], 1);
        assert_eq!(ids(&state), vec![6]);
    }

    #[test]
    fn settling_total_ends_paging() {
        let mut state = FeedState::new();
        state.apply_older_page(vec![message(9, 90), message(8, 80)], 9);
        assert!(state.has_more());

        state.settle_total();

        assert_eq!(state.total(), 2);
        assert!(!state.has_more());
    }

    #[test]
    fn oldest_is_the_pagination_boundary() {
        let mut state = FeedState::new();
        state.apply_older_page(vec![message(8, 80), message(7, 70)], 5);
        assert_eq!(state.oldest().map(|m| m.id), Some(MessageId::new(7)));
        assert_eq!(state.newest().map(|m| m.id), Some(MessageId::new(8)));
    }
}
