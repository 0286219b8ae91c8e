use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::backend::{
    ApiResult, BoxFuture, ChannelClosedSnafu, ChannelSubscription, ConversationApi, HistoryQuery,
    InvalidPayloadSnafu, PushChannel, RejectedSnafu, SubscriptionId, UnknownConversationSnafu,
    UnknownMessageSnafu,
    UnsupportedBackendSnafu, make_subscription,
};
use super::wire::{
    AttachmentUpload, CreateResponse, DeleteResponse, HistoryResponse, PageMeta, UploadAck,
    WireAttachment, WireChannelEvent, WireMessage, decode_channel_event,
};

pub const LOOPBACK_BACKEND_ID: &str = "loopback";

/// Rejects every backend id this build cannot construct.
pub fn ensure_supported_backend(backend_id: &str) -> ApiResult<()> {
    ensure!(
        backend_id.trim() == LOOPBACK_BACKEND_ID,
        UnsupportedBackendSnafu {
            stage: "ensure-supported-backend",
            backend_id: backend_id.to_string(),
        }
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopbackOperation {
    FetchHistory,
    CreateMessage,
    DeleteMessage,
    UploadAttachment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackUser {
    pub id: u64,
    pub name: String,
}

impl LoopbackUser {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

struct Subscriber {
    id: SubscriptionId,
    events: mpsc::UnboundedSender<WireChannelEvent>,
    cancel_rx: oneshot::Receiver<()>,
}

impl Subscriber {
    fn is_live(&mut self) -> bool {
        matches!(
            self.cancel_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

#[derive(Default)]
struct LoopbackState {
    // Stored oldest first; ids only grow.
    conversations: BTreeMap<u64, Vec<WireMessage>>,
    next_message_id: u64,
    next_subscription_id: u64,
    subscribers: Vec<Subscriber>,
    failures: HashMap<LoopbackOperation, String>,
    calls: HashMap<LoopbackOperation, usize>,
    closed: bool,
}

impl LoopbackState {
    fn record_call(&mut self, operation: LoopbackOperation, stage: &'static str) -> ApiResult<()> {
        *self.calls.entry(operation).or_default() += 1;

        if let Some(reason) = self.failures.remove(&operation) {
            tracing::debug!(?operation, %reason, "loopback injected failure");
            return RejectedSnafu { stage, reason }.fail();
        }

        Ok(())
    }

    fn store_message(
        &mut self,
        parent_id: u64,
        author: &LoopbackUser,
        body: Option<String>,
        attachments: Vec<WireAttachment>,
    ) -> WireMessage {
        self.next_message_id = self.next_message_id.saturating_add(1);
        let message = WireMessage {
            id: self.next_message_id,
            parent_id,
            author_id: author.id,
            author_name: Some(author.name.clone()),
            body,
            attachments,
            created_at: Some(current_unix_timestamp_seconds()),
        };

        self.conversations
            .entry(parent_id)
            .or_default()
            .push(message.clone());
        message
    }

    fn broadcast(&mut self, event: WireChannelEvent) {
        self.subscribers.retain_mut(|subscriber| {
            if !subscriber.is_live() {
                tracing::debug!(
                    subscription_id = subscriber.id.0,
                    "dropping cancelled loopback subscriber"
                );
                return false;
            }
            subscriber.events.send(event.clone()).is_ok()
        });
    }
}

/// In-process conversation backend.
///
/// Serves history, accepts writes, and echoes every write to all live subscribers the way a
/// real push gateway would, including back to the author.
pub struct LoopbackBackend {
    session_user: LoopbackUser,
    state: Mutex<LoopbackState>,
}

impl LoopbackBackend {
    pub fn new(session_user: LoopbackUser) -> Self {
        Self {
            session_user,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    pub fn session_user(&self) -> &LoopbackUser {
        &self.session_user
    }

    /// Writes history without notifying subscribers. Returns the new ids, oldest first.
    pub fn seed_history(&self, parent_id: u64, author: &LoopbackUser, count: usize) -> Vec<u64> {
        let mut state = self.lock();
        (0..count)
            .map(|index| {
                state
                    .store_message(
                        parent_id,
                        author,
                        Some(format!("{} #{}", author.name, index + 1)),
                        Vec::new(),
                    )
                    .id
            })
            .collect()
    }

    /// Stores a message from any user and pushes it to subscribers.
    pub fn post_as(&self, parent_id: u64, author: &LoopbackUser, body: &str) -> WireMessage {
        let mut state = self.lock();
        let message = state.store_message(parent_id, author, Some(body.to_string()), Vec::new());
        state.broadcast(WireChannelEvent::NewMessage {
            message: message.clone(),
        });
        message
    }

    /// Pushes an event to subscribers without touching stored history.
    pub fn inject(&self, event: WireChannelEvent) {
        self.lock().broadcast(event);
    }

    pub fn inject_raw(&self, raw: &str) -> ApiResult<()> {
        let event = decode_channel_event(raw)?;
        self.inject(event);
        Ok(())
    }

    /// Makes the next call of `operation` fail with `reason`.
    pub fn fail_next(&self, operation: LoopbackOperation, reason: impl Into<String>) {
        self.lock().failures.insert(operation, reason.into());
    }

    pub fn call_count(&self, operation: LoopbackOperation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn message_count(&self, parent_id: u64) -> usize {
        self.lock()
            .conversations
            .get(&parent_id)
            .map_or(0, |messages| messages.len())
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain_mut(Subscriber::is_live);
        state.subscribers.len()
    }

    /// Closes the channel side: live subscriptions end and new ones are refused.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history_page(&self, query: HistoryQuery) -> ApiResult<HistoryResponse> {
        let mut state = self.lock();
        state.record_call(LoopbackOperation::FetchHistory, "loopback-fetch-history")?;

        let per_page = usize::try_from(query.per_page.max(1)).unwrap_or(usize::MAX);
        let messages = state
            .conversations
            .get(&query.parent_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let total = messages.len();

        let older = messages
            .iter()
            .rev()
            .filter(|message| query.before.is_none_or(|before| message.id < before))
            .collect::<Vec<_>>();
        let skipped = total - older.len();
        let items = older
            .into_iter()
            .take(per_page)
            .cloned()
            .collect::<Vec<_>>();

        Ok(HistoryResponse {
            items,
            meta: PageMeta {
                total: total as u64,
                page: (skipped / per_page + 1) as u64,
                page_count: total.div_ceil(per_page) as u64,
            },
        })
    }

    fn create(&self, parent_id: u64, body: String) -> ApiResult<CreateResponse> {
        let mut state = self.lock();
        state.record_call(LoopbackOperation::CreateMessage, "loopback-create-message")?;
        ensure!(
            parent_id != 0,
            UnknownConversationSnafu {
                stage: "loopback-create-message",
                parent_id,
            }
        );
        ensure!(
            !body.trim().is_empty(),
            InvalidPayloadSnafu {
                stage: "loopback-create-message",
                details: "message body is empty".to_string(),
            }
        );

        let message = state.store_message(parent_id, &self.session_user, Some(body), Vec::new());
        // Echo before responding: the author sees the push and the response for one id.
        state.broadcast(WireChannelEvent::NewMessage {
            message: message.clone(),
        });
        Ok(CreateResponse { data: message })
    }

    fn delete(&self, message_id: u64) -> ApiResult<DeleteResponse> {
        let mut state = self.lock();
        state.record_call(LoopbackOperation::DeleteMessage, "loopback-delete-message")?;

        let (parent_id, index) = state
            .conversations
            .iter()
            .find_map(|(parent_id, messages)| {
                messages
                    .iter()
                    .position(|message| message.id == message_id)
                    .map(|index| (*parent_id, index))
            })
            .context(UnknownMessageSnafu {
                stage: "loopback-delete-message",
                message_id,
            })?;

        if let Some(messages) = state.conversations.get_mut(&parent_id) {
            messages.remove(index);
        }
        state.broadcast(WireChannelEvent::MessageDeleted {
            id: message_id,
            parent_id,
        });

        Ok(DeleteResponse {
            message: format!("message {message_id} deleted"),
        })
    }

    fn upload(&self, parent_id: u64, file: AttachmentUpload) -> ApiResult<UploadAck> {
        let mut state = self.lock();
        state.record_call(
            LoopbackOperation::UploadAttachment,
            "loopback-upload-attachment",
        )?;
        ensure!(
            parent_id != 0,
            UnknownConversationSnafu {
                stage: "loopback-upload-attachment",
                parent_id,
            }
        );
        ensure!(
            !file.file_name.trim().is_empty(),
            InvalidPayloadSnafu {
                stage: "loopback-upload-attachment",
                details: "attachment file name is empty".to_string(),
            }
        );

        let size_bytes = file.bytes.len() as u64;
        let attachment = WireAttachment {
            url: format!("loopback://attachments/{parent_id}/{}", file.file_name),
            name: file.file_name.clone(),
            mime_type: file.mime_type,
            size_bytes: Some(size_bytes),
        };
        let message = state.store_message(parent_id, &self.session_user, None, vec![attachment]);
        state.broadcast(WireChannelEvent::NewMessage { message });

        Ok(UploadAck {
            file_name: file.file_name,
            size_bytes,
        })
    }
}

impl ConversationApi for LoopbackBackend {
    fn fetch_history<'a>(
        &'a self,
        query: HistoryQuery,
    ) -> BoxFuture<'a, ApiResult<HistoryResponse>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.history_page(query)
        })
    }

    fn create_message<'a>(
        &'a self,
        parent_id: u64,
        body: String,
    ) -> BoxFuture<'a, ApiResult<CreateResponse>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.create(parent_id, body)
        })
    }

    fn delete_message<'a>(&'a self, message_id: u64) -> BoxFuture<'a, ApiResult<DeleteResponse>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.delete(message_id)
        })
    }

    fn upload_attachment<'a>(
        &'a self,
        parent_id: u64,
        file: AttachmentUpload,
    ) -> BoxFuture<'a, ApiResult<UploadAck>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.upload(parent_id, file)
        })
    }
}

impl PushChannel for LoopbackBackend {
    fn subscribe(&self) -> ApiResult<ChannelSubscription> {
        let mut state = self.lock();
        ensure!(
            !state.closed,
            ChannelClosedSnafu {
                stage: "loopback-subscribe",
            }
        );

        state.next_subscription_id = state.next_subscription_id.saturating_add(1);
        let id = SubscriptionId(state.next_subscription_id);
        let (events, subscription, cancel_rx) = make_subscription(id);
        state.subscribers.push(Subscriber {
            id,
            events,
            cancel_rx,
        });

        tracing::debug!(subscription_id = id.0, "loopback subscriber registered");
        Ok(subscription)
    }
}

fn current_unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> LoopbackBackend {
        LoopbackBackend::new(LoopbackUser::new(1, "Ada"))
    }

    #[tokio::test]
    async fn history_pages_walk_backwards_with_before_cursor() {
        let backend = backend();
        let author = LoopbackUser::new(2, "Grace");
        let ids = backend.seed_history(3, &author, 5);

        let first = backend
            .fetch_history(HistoryQuery::new(3, 2))
            .await
            .expect("first page");
        let first_ids = first.items.iter().map(|item| item.id).collect::<Vec<_>>();
        assert_eq!(first_ids, vec![ids[4], ids[3]]);
        assert_eq!(first.meta.total, 5);
        assert_eq!(first.meta.page, 1);
        assert_eq!(first.meta.page_count, 3);

        let second = backend
            .fetch_history(HistoryQuery::new(3, 2).with_before(Some(ids[3])))
            .await
            .expect("second page");
        let second_ids = second.items.iter().map(|item| item.id).collect::<Vec<_>>();
        assert_eq!(second_ids, vec![ids[2], ids[1]]);
        assert_eq!(second.meta.page, 2);
    }

    #[tokio::test]
    async fn create_echoes_to_subscribers_before_responding() {
        let backend = backend();
        let mut subscription = backend.subscribe().expect("subscribe");

        let created = backend
            .create_message(3, "hello".to_string())
            .await
            .expect("create");

        let pushed = subscription.try_recv().expect("echo should be queued");
        assert_eq!(
            pushed,
            WireChannelEvent::NewMessage {
                message: created.data.clone()
            }
        );
        assert_eq!(created.data.author_id, 1);
    }

    #[tokio::test]
    async fn injected_failure_applies_to_the_next_call_only() {
        let backend = backend();
        backend.fail_next(LoopbackOperation::CreateMessage, "offline");

        let failed = backend.create_message(3, "hi".to_string()).await;
        assert!(failed.is_err());
        assert_eq!(backend.message_count(3), 0);

        let created = backend.create_message(3, "hi".to_string()).await;
        assert!(created.is_ok());
        assert_eq!(backend.call_count(LoopbackOperation::CreateMessage), 2);
    }

    #[tokio::test]
    async fn delete_unknown_message_fails() {
        let backend = backend();
        let result = backend.delete_message(42).await;
        assert!(matches!(
            result,
            Err(crate::ApiError::UnknownMessage { message_id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn zero_parent_id_is_an_unknown_conversation() {
        let backend = backend();
        let result = backend.create_message(0, "hi".to_string()).await;
        assert!(matches!(
            result,
            Err(crate::ApiError::UnknownConversation { parent_id: 0, .. })
        ));
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let backend = backend();
        let subscription = backend.subscribe().expect("subscribe");
        assert_eq!(backend.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let backend = backend();
        let subscription = backend.subscribe().expect("subscribe");
        backend.unsubscribe(subscription);

        backend.post_as(3, &LoopbackUser::new(2, "Grace"), "late");
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[test]
    fn shutdown_refuses_new_subscriptions() {
        let backend = backend();
        backend.shutdown();
        assert!(backend.subscribe().is_err());
    }

    #[test]
    fn only_loopback_backend_is_supported() {
        assert!(ensure_supported_backend("loopback").is_ok());
        assert!(ensure_supported_backend("https").is_err());
    }
}
