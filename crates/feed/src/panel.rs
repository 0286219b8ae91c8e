//! The conversation panel: one open conversation's feed plus everything that mutates it.
//!
//! The panel performs no IO. Each host operation hands back a request stamped with a
//! [`Ticket`]; whoever performs the call feeds the result into the matching `apply_*`
//! method. Tickets from an earlier open/close lifetime are dropped as stale.

use std::sync::Arc;

use huddle_api::{AttachmentUpload, Authorizer};
use serde::{Deserialize, Serialize};

use crate::boundary::HistoryPage;
use crate::composer::{Composer, ComposerAction, KeyEvent};
use crate::error::{Capability, FeedError, FeedResult, Operation, PanelClosedSnafu};
use crate::events::{ChannelEvent, PanelNotice, SurfacedError};
use crate::feed::FeedState;
use crate::message::{ConversationId, Message, MessageId, UserId};
use crate::notification::{NotificationContext, NotificationPolicy};
use crate::pagination::{DEFAULT_PAGE_SIZE, FetchKind, HistoryRequest, PaginationCursor};
use crate::router::{ChannelRouter, DEFAULT_PREVIEW_CHARS, Route, SubscriptionGeneration};
use crate::submission::{CreateRequest, SubmissionPipeline};
use crate::ticket::{Completion, PanelGeneration, Ticket};
use crate::unread::UnreadCounts;
use crate::upload::{UploadQueue, UploadRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    pub page_size: u32,
    pub notification: NotificationPolicy,
    pub preview_chars: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            notification: NotificationPolicy::default(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanelLifecycle {
    #[default]
    Closed,
    Open {
        parent_id: ConversationId,
        generation: PanelGeneration,
    },
}

impl PanelLifecycle {
    pub fn parent_id(&self) -> Option<ConversationId> {
        match self {
            Self::Open { parent_id, .. } => Some(*parent_id),
            Self::Closed => None,
        }
    }
}

/// Work the host has to start after a successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedPanel {
    pub parent_id: ConversationId,
    /// Tag to attach to every event read from the new push subscription.
    pub subscription: SubscriptionGeneration,
    pub history: HistoryRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRequest {
    pub ticket: Ticket,
    pub message_id: MessageId,
}

/// Read-only copy of everything a host renders.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PanelSnapshot {
    pub parent_id: Option<ConversationId>,
    pub items: Vec<Message>,
    pub total: u64,
    pub has_more: bool,
    pub loading: bool,
    pub submitting: bool,
    pub pending_upload: Option<String>,
    pub subscribed: bool,
    pub composer_text: String,
    pub composer_hint: &'static str,
    pub unread: Vec<(ConversationId, u32)>,
}

pub struct ConversationPanel {
    config: PanelConfig,
    authorizer: Arc<dyn Authorizer>,
    current_user_id: UserId,
    has_user_interacted: bool,
    lifecycle: PanelLifecycle,
    last_generation: PanelGeneration,
    next_sequence: u64,
    feed: FeedState,
    router: ChannelRouter,
    pagination: PaginationCursor,
    submission: SubmissionPipeline,
    composer: Composer,
    uploads: UploadQueue,
    unread: UnreadCounts,
    outbox: Vec<PanelNotice>,
}

impl ConversationPanel {
    pub fn new(config: PanelConfig, current_user_id: UserId, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            config,
            authorizer,
            current_user_id,
            has_user_interacted: false,
            lifecycle: PanelLifecycle::Closed,
            last_generation: PanelGeneration::new(0),
            next_sequence: 0,
            feed: FeedState::new(),
            router: ChannelRouter::new(config.preview_chars),
            pagination: PaginationCursor::new(config.page_size),
            submission: SubmissionPipeline::new(),
            composer: Composer::new(),
            uploads: UploadQueue::new(),
            unread: UnreadCounts::new(),
            outbox: Vec::new(),
        }
    }

    pub fn lifecycle(&self) -> PanelLifecycle {
        self.lifecycle
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.lifecycle.parent_id()
    }

    pub fn feed(&self) -> &FeedState {
        &self.feed
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn unread(&self) -> &UnreadCounts {
        &self.unread
    }

    pub fn has_user_interacted(&self) -> bool {
        self.has_user_interacted
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        PanelSnapshot {
            parent_id: self.active_conversation(),
            items: self.feed.items().to_vec(),
            total: self.feed.total(),
            has_more: self.feed.has_more(),
            loading: self.feed.is_loading(),
            submitting: self.submission.is_submitting(),
            pending_upload: self.uploads.pending_file().map(str::to_string),
            subscribed: self.router.is_subscribed(),
            composer_text: self.composer.text().to_string(),
            composer_hint: self.composer.hint(),
            unread: self.unread.iter().collect(),
        }
    }

    pub fn drain_notices(&mut self) -> Vec<PanelNotice> {
        std::mem::take(&mut self.outbox)
    }

    /// Opens `parent_id`, closing whatever was open before.
    pub fn open(&mut self, parent_id: ConversationId) -> FeedResult<OpenedPanel> {
        if !self.authorizer.can_view() {
            return self.reject(FeedError::PermissionDenied {
                stage: "open-check-permission",
                capability: Capability::View,
            });
        }

        self.close();

        let subscription = match self.router.subscribe() {
            Ok(subscription) => subscription,
            Err(rejection) => {
                tracing::warn!(?rejection, "push channel rejected subscribe on open");
                return self.reject(FeedError::Busy {
                    stage: "open-subscribe",
                    operation: Operation::Subscribe,
                });
            }
        };

        let generation = self.last_generation.next();
        self.last_generation = generation;
        self.lifecycle = PanelLifecycle::Open {
            parent_id,
            generation,
        };
        self.unread.clear(parent_id);

        let ticket = self.issue_ticket(generation);
        let history = self
            .pagination
            .first_page(&mut self.feed, parent_id, ticket, FetchKind::Initial);

        tracing::info!(
            parent_id = %parent_id,
            generation = generation.0,
            subscription = subscription.0,
            "conversation panel opened"
        );

        Ok(OpenedPanel {
            parent_id,
            subscription,
            history,
        })
    }

    /// Tears down the open conversation. Returns the subscription generation the host must
    /// drop, or `None` when nothing was open.
    pub fn close(&mut self) -> Option<SubscriptionGeneration> {
        let PanelLifecycle::Open { parent_id, .. } = self.lifecycle else {
            return None;
        };

        let subscription = self.router.unsubscribe().ok();
        self.lifecycle = PanelLifecycle::Closed;
        self.pagination.cancel(&mut self.feed);
        self.submission.cancel();
        self.uploads.cancel();
        self.composer.clear();
        self.composer.reset_keys();
        self.feed.reset();

        tracing::info!(parent_id = %parent_id, "conversation panel closed");
        subscription
    }

    /// Re-targets the panel when the host navigates. Same conversation is a no-op.
    pub fn on_parent_changed(&mut self, parent_id: ConversationId) -> FeedResult<Option<OpenedPanel>> {
        if self.active_conversation() == Some(parent_id) {
            return Ok(None);
        }
        self.open(parent_id).map(Some)
    }

    pub fn note_user_interaction(&mut self) {
        if !self.has_user_interacted {
            tracing::debug!("first user interaction recorded");
        }
        self.has_user_interacted = true;
    }

    pub fn set_composer_text(&mut self, text: impl Into<String>) {
        self.composer.set_text(text);
    }

    pub fn insert_mention(&mut self, display_name: &str, user_id: UserId) {
        self.composer.insert_mention(display_name, user_id);
    }

    /// Feeds one key event to the composer; Shift+Enter sends the draft.
    pub fn handle_key(&mut self, event: KeyEvent) -> FeedResult<Option<CreateRequest>> {
        self.note_user_interaction();
        match self.composer.handle_key(event) {
            ComposerAction::Submit => {
                let body = self.composer.text().to_string();
                self.send_message(&body).map(Some)
            }
            ComposerAction::InsertNewline | ComposerAction::None => Ok(None),
        }
    }

    pub fn send_message(&mut self, body: &str) -> FeedResult<CreateRequest> {
        let (parent_id, ticket) = self.open_ticket("send-require-open")?;
        let can_post = self.authorizer.can_post();
        let result = self.submission.begin(body, can_post, parent_id, ticket);
        self.surface(result)
    }

    pub fn load_more(&mut self) -> FeedResult<Option<HistoryRequest>> {
        let (parent_id, ticket) = self.open_ticket("load-more-require-open")?;
        Ok(self.pagination.load_more(&mut self.feed, parent_id, ticket))
    }

    /// Re-fetches the first page; supersedes any older-page fetch in flight.
    pub fn refresh(&mut self) -> FeedResult<HistoryRequest> {
        let (parent_id, ticket) = self.open_ticket("refresh-require-open")?;
        Ok(self
            .pagination
            .first_page(&mut self.feed, parent_id, ticket, FetchKind::Refresh))
    }

    pub fn delete_message(&mut self, message_id: MessageId) -> FeedResult<DeleteRequest> {
        let (_, ticket) = self.open_ticket("delete-require-open")?;
        if !self.authorizer.can_delete() {
            return self.reject(FeedError::PermissionDenied {
                stage: "delete-check-permission",
                capability: Capability::Delete,
            });
        }
        Ok(DeleteRequest { ticket, message_id })
    }

    pub fn upload(&mut self, file: AttachmentUpload) -> FeedResult<UploadRequest> {
        let (parent_id, ticket) = self.open_ticket("upload-require-open")?;
        let can_post = self.authorizer.can_post();
        let result = self.uploads.begin(file, can_post, parent_id, ticket);
        self.surface(result)
    }

    pub fn apply_history(
        &mut self,
        ticket: Ticket,
        result: FeedResult<HistoryPage>,
    ) -> FeedResult<Completion<usize>> {
        if !self.is_current(ticket) {
            tracing::debug!(?ticket, "dropping history response for a closed panel");
            return Ok(Completion::Stale);
        }
        let outcome = self.pagination.complete(&mut self.feed, ticket, result);
        self.surface(outcome)
    }

    pub fn apply_created(
        &mut self,
        ticket: Ticket,
        result: FeedResult<Message>,
    ) -> FeedResult<Completion<bool>> {
        if !self.is_current(ticket) {
            tracing::debug!(?ticket, "dropping create response for a closed panel");
            return Ok(Completion::Stale);
        }
        let outcome = self
            .submission
            .complete(&mut self.feed, &mut self.composer, ticket, result);
        self.surface(outcome)
    }

    pub fn apply_deleted(
        &mut self,
        ticket: Ticket,
        message_id: MessageId,
        result: FeedResult<()>,
    ) -> FeedResult<Completion<bool>> {
        if !self.is_current(ticket) {
            tracing::debug!(?ticket, "dropping delete response for a closed panel");
            return Ok(Completion::Stale);
        }
        let result = result.map(|()| {
            let removed = self.feed.remove(message_id);
            tracing::debug!(%message_id, removed, "message deleted");
            Completion::Applied(removed)
        });
        self.surface(result)
    }

    /// Applies an upload response. On success returns the refresh request to issue next.
    pub fn apply_upload(
        &mut self,
        ticket: Ticket,
        result: FeedResult<()>,
    ) -> FeedResult<Completion<HistoryRequest>> {
        if !self.is_current(ticket) {
            tracing::debug!(?ticket, "dropping upload response for a closed panel");
            return Ok(Completion::Stale);
        }
        let outcome = self.uploads.complete(ticket, result);
        match self.surface(outcome)? {
            Completion::Applied(()) => self.refresh().map(Completion::Applied),
            Completion::Stale => Ok(Completion::Stale),
        }
    }

    /// Routes one push event tagged with the subscription it was read from.
    ///
    /// Returns false when the event was dropped as stale or no conversation is open.
    pub fn handle_channel_event(
        &mut self,
        subscription: SubscriptionGeneration,
        event: ChannelEvent,
    ) -> bool {
        let Some(parent_id) = self.active_conversation() else {
            tracing::debug!(event_parent_id = %event.parent_id(), "dropping event for a closed panel");
            return false;
        };

        let context = NotificationContext {
            active_conversation_id: Some(parent_id),
            current_user_id: self.current_user_id,
            has_user_interacted: self.has_user_interacted,
        };
        let (alert, from_other) = match &event {
            ChannelEvent::NewMessage(message) => (
                self.config.notification.evaluate(message, &context),
                message.author_id != self.current_user_id,
            ),
            ChannelEvent::MessageDeleted { .. } => (None, false),
        };

        let Some(route) = self.router.route(subscription, event, parent_id) else {
            return false;
        };

        match route {
            Route::Append(message) => {
                let message_id = message.id;
                let inserted = self.feed.apply_newer(message);
                tracing::debug!(%message_id, inserted, "live message merged");
            }
            Route::Remove(message_id) => {
                let removed = self.feed.remove(message_id);
                tracing::debug!(%message_id, removed, "live deletion applied");
            }
            Route::Background(notice) => {
                if from_other {
                    let unread = self.unread.increment(notice.parent_id);
                    tracing::debug!(background_parent_id = %notice.parent_id, unread, "background message");
                }
                self.outbox.push(PanelNotice::Background(notice));
            }
            Route::Ignore => {}
        }

        if let Some(alert) = alert {
            self.outbox.push(PanelNotice::Alert(alert));
        }
        true
    }

    /// Drops the subscription tagged `generation` after its transport failed or ended.
    /// Returns false when that generation is no longer the live one.
    pub fn on_channel_lost(&mut self, generation: SubscriptionGeneration) -> bool {
        if self.router.state().active_generation() != Some(generation) {
            return false;
        }
        let _ = self.router.unsubscribe();
        tracing::warn!(
            generation = generation.0,
            parent_id = ?self.active_conversation(),
            "push channel lost"
        );
        true
    }

    /// Surfaces an error raised outside the panel, such as a failed transport subscribe.
    pub fn report_error(&mut self, error: FeedError) {
        let _ = self.reject::<()>(error);
    }

    fn open_ticket(&mut self, stage: &'static str) -> FeedResult<(ConversationId, Ticket)> {
        match self.lifecycle {
            PanelLifecycle::Open {
                parent_id,
                generation,
            } => Ok((parent_id, self.issue_ticket(generation))),
            PanelLifecycle::Closed => self.reject(PanelClosedSnafu { stage }.build()),
        }
    }

    fn issue_ticket(&mut self, generation: PanelGeneration) -> Ticket {
        self.next_sequence = self.next_sequence.saturating_add(1);
        Ticket::new(generation, self.next_sequence)
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        matches!(self.lifecycle, PanelLifecycle::Open { generation, .. } if generation == ticket.generation)
    }

    fn surface<T>(&mut self, result: FeedResult<T>) -> FeedResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => self.reject(error),
        }
    }

    fn reject<T>(&mut self, error: FeedError) -> FeedResult<T> {
        tracing::debug!(stage = error.stage(), kind = ?error.kind(), %error, "panel operation failed");
        self.outbox.push(PanelNotice::Error(SurfacedError {
            kind: error.kind(),
            message: error.to_string(),
        }));
        Err(error)
    }
}
