use huddle_api::HistoryQuery;

use crate::boundary::HistoryPage;
use crate::error::FeedResult;
use crate::feed::FeedState;
use crate::message::{ConversationId, MessageId};
use crate::ticket::{Completion, Ticket};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    /// First page after the panel opens.
    Initial,
    /// Next older page behind the oldest loaded message.
    Older,
    /// First page again, replacing the loaded window.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    pub ticket: Ticket,
    pub kind: FetchKind,
    pub parent_id: ConversationId,
    pub per_page: u32,
    pub before: Option<MessageId>,
}

impl HistoryRequest {
    pub fn query(&self) -> HistoryQuery {
        HistoryQuery::new(self.parent_id.0, self.per_page).with_before(self.before.map(|id| id.0))
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlightFetch {
    ticket: Ticket,
    kind: FetchKind,
    before: Option<MessageId>,
}

/// Backward paging over one conversation, one fetch at a time.
///
/// The feed's `loading` flag is the gate: it is raised when a request is issued and
/// cleared when that request's response (success or failure) is applied.
#[derive(Debug, Clone)]
pub struct PaginationCursor {
    page_size: u32,
    in_flight: Option<InFlightFetch>,
    /// Oldest id the server has returned, counting rows that failed validation.
    boundary: Option<MessageId>,
}

impl PaginationCursor {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            in_flight: None,
            boundary: None,
        }
    }

    pub fn in_flight(&self) -> Option<Ticket> {
        self.in_flight.map(|fetch| fetch.ticket)
    }

    /// Issues the next older page, or `None` while loading or once everything is loaded.
    pub fn load_more(
        &mut self,
        feed: &mut FeedState,
        parent_id: ConversationId,
        ticket: Ticket,
    ) -> Option<HistoryRequest> {
        if feed.is_loading() || !feed.has_more() {
            tracing::trace!(
                parent_id = %parent_id,
                loading = feed.is_loading(),
                has_more = feed.has_more(),
                "load more skipped"
            );
            return None;
        }

        let before = match (feed.oldest().map(|message| message.id), self.boundary) {
            (Some(loaded), Some(boundary)) => Some(loaded.min(boundary)),
            (loaded, boundary) => loaded.or(boundary),
        };
        Some(self.issue(feed, parent_id, ticket, FetchKind::Older, before))
    }

    /// Issues a first-page fetch. Any older-page fetch still in flight is superseded.
    pub fn first_page(
        &mut self,
        feed: &mut FeedState,
        parent_id: ConversationId,
        ticket: Ticket,
        kind: FetchKind,
    ) -> HistoryRequest {
        if let Some(previous) = self.in_flight {
            tracing::debug!(
                parent_id = %parent_id,
                superseded = ?previous.kind,
                "first page fetch supersedes in-flight fetch"
            );
        }
        match kind {
            FetchKind::Refresh => feed.begin_refresh(),
            FetchKind::Initial | FetchKind::Older => {
                self.boundary = None;
                feed.end_refresh();
            }
        }
        self.issue(feed, parent_id, ticket, kind, None)
    }

    /// Applies the response for `ticket`.
    ///
    /// On failure `loading` is cleared and the items are left as they were. A short page, or
    /// an older page that does not reach past the requested boundary, ends paging.
    pub fn complete(
        &mut self,
        feed: &mut FeedState,
        ticket: Ticket,
        result: FeedResult<HistoryPage>,
    ) -> FeedResult<Completion<usize>> {
        let Some(fetch) = self.in_flight.filter(|fetch| fetch.ticket == ticket) else {
            tracing::debug!(?ticket, "dropping stale history response");
            return Ok(Completion::Stale);
        };

        self.in_flight = None;
        feed.set_loading(false);

        let page = result.inspect_err(|_| feed.end_refresh())?;
        let exhausted = page.fetched < self.page_size as usize
            || (fetch.kind == FetchKind::Older
                && page
                    .oldest_wire_id
                    .is_none_or(|oldest| fetch.before.is_some_and(|before| oldest >= before)));
        self.boundary = match fetch.kind {
            FetchKind::Older => match (self.boundary, page.oldest_wire_id) {
                (Some(current), Some(oldest)) => Some(current.min(oldest)),
                (current, oldest) => current.or(oldest),
            },
            FetchKind::Initial | FetchKind::Refresh => page.oldest_wire_id,
        };

        let added = match fetch.kind {
            FetchKind::Initial | FetchKind::Older => feed.apply_older_page(page.items, page.total),
            FetchKind::Refresh => {
                let fetched = page.items.len();
                feed.replace_with_first_page(page.items, page.total);
                fetched
            }
        };
        if exhausted && feed.has_more() {
            tracing::debug!(
                kind = ?fetch.kind,
                fetched = page.fetched,
                loaded = feed.len(),
                total = feed.total(),
                "server has nothing older, settling total"
            );
            feed.settle_total();
        }

        tracing::debug!(
            kind = ?fetch.kind,
            added,
            loaded = feed.len(),
            total = feed.total(),
            has_more = feed.has_more(),
            "history page applied"
        );
        Ok(Completion::Applied(added))
    }

    pub fn cancel(&mut self, feed: &mut FeedState) {
        self.in_flight = None;
        self.boundary = None;
        feed.set_loading(false);
        feed.end_refresh();
    }

    fn issue(
        &mut self,
        feed: &mut FeedState,
        parent_id: ConversationId,
        ticket: Ticket,
        kind: FetchKind,
        before: Option<MessageId>,
    ) -> HistoryRequest {
        self.in_flight = Some(InFlightFetch {
            ticket,
            kind,
            before,
        });
        feed.set_loading(true);

        HistoryRequest {
            ticket,
            kind,
            parent_id,
            per_page: self.page_size,
            before,
        }
    }
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use huddle_api::ApiError;

    use super::*;
    use crate::error::FeedError;
    use crate::message::{Message, UserId};
    use crate::ticket::PanelGeneration;

    const PARENT: ConversationId = ConversationId::new(3);

    /// Server-side history with ids 1..=total, answering like the real endpoint.
    fn serve(total: u64, request: &HistoryRequest) -> HistoryPage {
        let items = (1..=total)
            .rev()
            .filter(|id| request.before.is_none_or(|before| *id < before.0))
            .take(request.per_page as usize)
            .map(|id| {
                Message::new(MessageId::new(id), PARENT, UserId::new(2), format!("#{id}"))
                    .with_created_at(id)
            })
            .collect();
        HistoryPage::new(items, total)
    }

    fn ticket(sequence: u64) -> Ticket {
        Ticket::new(PanelGeneration::new(1), sequence)
    }

    #[test]
    fn four_pages_of_seven_load_twenty_five_messages() {
        let mut feed = FeedState::with_total(25);
        let mut cursor = PaginationCursor::new(7);
        let mut cursors_seen = Vec::new();

        for sequence in 1..=4 {
            let request = cursor
                .load_more(&mut feed, PARENT, ticket(sequence))
                .expect("more pages remain");
            cursors_seen.push(request.before.map(|id| id.0));
            let page = serve(25, &request);
            cursor
                .complete(&mut feed, request.ticket, Ok(page))
                .expect("page applies");
        }

        assert_eq!(cursors_seen, vec![None, Some(19), Some(12), Some(5)]);
        assert_eq!(feed.len(), 25);
        assert!(!feed.has_more());
        assert!(!feed.is_loading());
        assert!(cursor.load_more(&mut feed, PARENT, ticket(5)).is_none());
    }

    #[test]
    fn load_more_is_a_no_op_while_loading() {
        let mut feed = FeedState::with_total(25);
        let mut cursor = PaginationCursor::new(7);

        assert!(cursor.load_more(&mut feed, PARENT, ticket(1)).is_some());
        assert!(feed.is_loading());
        assert!(cursor.load_more(&mut feed, PARENT, ticket(2)).is_none());
        assert_eq!(cursor.in_flight(), Some(ticket(1)));
    }

    #[test]
    fn failed_page_clears_loading_and_keeps_items() {
        let mut feed = FeedState::with_total(25);
        let mut cursor = PaginationCursor::new(7);
        let request = cursor
            .load_more(&mut feed, PARENT, ticket(1))
            .expect("request");
        cursor
            .complete(&mut feed, request.ticket, Ok(serve(25, &request)))
            .expect("page applies");
        let before = feed.clone();

        let retry = cursor
            .load_more(&mut feed, PARENT, ticket(2))
            .expect("request");
        let failure = Err(FeedError::Network {
            stage: "test",
            operation: crate::error::Operation::FetchHistory,
            source: ApiError::ChannelClosed { stage: "test" },
        });
        assert!(cursor.complete(&mut feed, retry.ticket, failure).is_err());

        assert!(!feed.is_loading());
        assert_eq!(feed.items(), before.items());
        assert!(cursor.load_more(&mut feed, PARENT, ticket(3)).is_some());
    }

    #[test]
    fn superseded_response_is_stale() {
        let mut feed = FeedState::with_total(25);
        let mut cursor = PaginationCursor::new(7);
        let older = cursor
            .load_more(&mut feed, PARENT, ticket(1))
            .expect("request");
        let refresh = cursor.first_page(&mut feed, PARENT, ticket(2), FetchKind::Refresh);

        let outcome = cursor
            .complete(&mut feed, older.ticket, Ok(serve(25, &older)))
            .expect("stale is not an error");
        assert!(outcome.is_stale());
        assert!(feed.is_loading());

        cursor
            .complete(&mut feed, refresh.ticket, Ok(serve(25, &refresh)))
            .expect("refresh applies");
        assert_eq!(feed.len(), 7);
        assert!(!feed.is_loading());
    }

    #[test]
    fn page_of_rejected_rows_still_advances_the_cursor() {
        let mut feed = FeedState::new();
        let mut cursor = PaginationCursor::new(3);
        let first = cursor.first_page(&mut feed, PARENT, ticket(1), FetchKind::Initial);
        cursor
            .complete(&mut feed, first.ticket, Ok(serve(9, &first)))
            .expect("first page applies");

        let mut cursors_seen = Vec::new();
        for sequence in 2..=4 {
            let Some(request) = cursor.load_more(&mut feed, PARENT, ticket(sequence)) else {
                break;
            };
            cursors_seen.push(request.before.map(|id| id.0));
            let page = match request.before.map(|id| id.0) {
                Some(7) => HistoryPage {
                    items: Vec::new(),
                    total: 9,
                    fetched: 3,
                    oldest_wire_id: Some(MessageId::new(4)),
                },
                _ => HistoryPage::new(Vec::new(), 9),
            };
            cursor
                .complete(&mut feed, request.ticket, Ok(page))
                .expect("page applies");
        }

        assert_eq!(cursors_seen, vec![Some(7), Some(4)]);
        assert_eq!(feed.len(), 3);
        assert!(!feed.has_more());
        assert!(!feed.is_loading());
    }

    #[test]
    fn older_page_that_repeats_itself_ends_paging() {
        let mut feed = FeedState::new();
        let mut cursor = PaginationCursor::new(3);
        let first = cursor.first_page(&mut feed, PARENT, ticket(1), FetchKind::Initial);
        cursor
            .complete(&mut feed, first.ticket, Ok(serve(9, &first)))
            .expect("first page applies");

        let repeated = |cursor: &mut PaginationCursor, feed: &mut FeedState, sequence| {
            let request = cursor.load_more(feed, PARENT, ticket(sequence))?;
            let page = HistoryPage {
                items: Vec::new(),
                total: 9,
                fetched: 3,
                oldest_wire_id: Some(MessageId::new(4)),
            };
            cursor
                .complete(feed, request.ticket, Ok(page))
                .expect("page applies");
            request.before.map(|id| id.0)
        };

        assert_eq!(repeated(&mut cursor, &mut feed, 2), Some(7));
        assert_eq!(repeated(&mut cursor, &mut feed, 3), Some(4));
        assert_eq!(repeated(&mut cursor, &mut feed, 4), None);
        assert!(!feed.has_more());
    }

    #[test]
    fn request_query_carries_cursor() {
        let request = HistoryRequest {
            ticket: ticket(1),
            kind: FetchKind::Older,
            parent_id: PARENT,
            per_page: 7,
            before: Some(MessageId::new(19)),
        };
        assert_eq!(
            request.query(),
            HistoryQuery::new(3, 7).with_before(Some(19))
        );
    }
}
