use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use super::wire::{
    AttachmentUpload, CreateResponse, DeleteResponse, HistoryResponse, UploadAck,
    WireChannelEvent,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("conversation {parent_id} does not exist"))]
    UnknownConversation { stage: &'static str, parent_id: u64 },
    #[snafu(display("message {message_id} does not exist"))]
    UnknownMessage {
        stage: &'static str,
        message_id: u64,
    },
    #[snafu(display("request rejected on `{stage}`: {reason}"))]
    Rejected {
        stage: &'static str,
        reason: String,
    },
    #[snafu(display("failed to decode channel event on `{stage}`: {source}"))]
    DecodeEvent {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("invalid payload on `{stage}`: {details}"))]
    InvalidPayload {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("backend '{backend_id}' is not supported"))]
    UnsupportedBackend {
        stage: &'static str,
        backend_id: String,
    },
    #[snafu(display("push channel is closed"))]
    ChannelClosed { stage: &'static str },
}

/// Query for one page of history, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub parent_id: u64,
    pub per_page: u32,
    /// Only messages strictly older than this id are returned.
    pub before: Option<u64>,
}

impl HistoryQuery {
    pub fn new(parent_id: u64, per_page: u32) -> Self {
        Self {
            parent_id,
            per_page,
            before: None,
        }
    }

    pub fn with_before(mut self, before: Option<u64>) -> Self {
        self.before = before;
        self
    }
}

/// Identifier the transport assigns to one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Owned handle for one push channel subscription.
///
/// Dropping the handle unsubscribes, so no callback outlives its owner.
pub struct ChannelSubscription {
    id: SubscriptionId,
    events: mpsc::UnboundedReceiver<WireChannelEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl ChannelSubscription {
    pub(crate) fn new(
        id: SubscriptionId,
        events: mpsc::UnboundedReceiver<WireChannelEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<WireChannelEvent> {
        if self.cancel_tx.is_none() {
            return None;
        }
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WireChannelEvent> {
        if self.cancel_tx.is_none() {
            return None;
        }
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.events.close();
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub trait ConversationApi: Send + Sync {
    fn fetch_history<'a>(&'a self, query: HistoryQuery)
    -> BoxFuture<'a, ApiResult<HistoryResponse>>;
    fn create_message<'a>(
        &'a self,
        parent_id: u64,
        body: String,
    ) -> BoxFuture<'a, ApiResult<CreateResponse>>;
    fn delete_message<'a>(&'a self, message_id: u64) -> BoxFuture<'a, ApiResult<DeleteResponse>>;
    fn upload_attachment<'a>(
        &'a self,
        parent_id: u64,
        file: AttachmentUpload,
    ) -> BoxFuture<'a, ApiResult<UploadAck>>;
}

pub trait PushChannel: Send + Sync {
    fn subscribe(&self) -> ApiResult<ChannelSubscription>;

    fn unsubscribe(&self, mut subscription: ChannelSubscription) {
        let id = subscription.id();
        if subscription.cancel() {
            tracing::debug!(subscription_id = id.0, "push channel unsubscribed");
        }
    }
}

/// Capability checks consumed as plain booleans.
pub trait Authorizer: Send + Sync {
    fn can_view(&self) -> bool {
        true
    }
    fn can_post(&self) -> bool;
    fn can_delete(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAuthorizer {
    pub can_view: bool,
    pub can_post: bool,
    pub can_delete: bool,
}

impl StaticAuthorizer {
    pub fn allow_all() -> Self {
        Self {
            can_view: true,
            can_post: true,
            can_delete: true,
        }
    }

    pub fn read_only() -> Self {
        Self {
            can_view: true,
            can_post: false,
            can_delete: false,
        }
    }
}

impl Authorizer for StaticAuthorizer {
    fn can_view(&self) -> bool {
        self.can_view
    }

    fn can_post(&self) -> bool {
        self.can_post
    }

    fn can_delete(&self) -> bool {
        self.can_delete
    }
}

pub trait Backend: ConversationApi + PushChannel {}

impl<T> Backend for T where T: ConversationApi + PushChannel {}

pub(crate) fn make_subscription(
    id: SubscriptionId,
) -> (
    mpsc::UnboundedSender<WireChannelEvent>,
    ChannelSubscription,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ChannelSubscription::new(id, event_rx, cancel_tx),
        cancel_rx,
    )
}
