//! Async driver that owns a [`ConversationPanel`] and performs its IO against a backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use huddle_api::{
    ApiError, AttachmentUpload, Backend, BoxFuture, ChannelSubscription, WireChannelEvent,
};
use snafu::{OptionExt, ResultExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::boundary::{HistoryPage, history_page_from_wire};
use crate::composer::KeyEvent;
use crate::error::{FeedError, FeedResult, NetworkSnafu, Operation, SessionClosedSnafu};
use crate::events::{ChannelEvent, PanelNotice};
use crate::message::{ConversationId, Message, MessageId, UserId};
use crate::panel::{ConversationPanel, DeleteRequest, OpenedPanel, PanelSnapshot};
use crate::pagination::HistoryRequest;
use crate::router::SubscriptionGeneration;
use crate::submission::CreateRequest;
use crate::ticket::Ticket;
use crate::upload::UploadRequest;

pub type SessionWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Open(ConversationId),
    Close,
    ParentChanged(ConversationId),
    SendMessage(String),
    SetComposerText(String),
    InsertMention { display_name: String, user_id: UserId },
    Key(KeyEvent),
    LoadMore,
    Refresh,
    DeleteMessage(MessageId),
    Upload(AttachmentUpload),
    NoteInteraction,
    Shutdown,
}

/// Published after every command, response, or push event the session applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    pub snapshot: PanelSnapshot,
    pub notices: Vec<PanelNotice>,
}

pub struct FeedSessionHandle {
    commands: mpsc::UnboundedSender<HostCommand>,
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
}

impl FeedSessionHandle {
    pub fn send(&self, command: HostCommand) -> FeedResult<()> {
        self.commands
            .send(command)
            .ok()
            .context(SessionClosedSnafu {
                stage: "session-send-command",
            })
    }

    pub fn open(&self, parent_id: ConversationId) -> FeedResult<()> {
        self.send(HostCommand::Open(parent_id))
    }

    pub fn close(&self) -> FeedResult<()> {
        self.send(HostCommand::Close)
    }

    pub fn send_message(&self, body: impl Into<String>) -> FeedResult<()> {
        self.send(HostCommand::SendMessage(body.into()))
    }

    pub fn load_more(&self) -> FeedResult<()> {
        self.send(HostCommand::LoadMore)
    }

    pub fn upload(&self, file: AttachmentUpload) -> FeedResult<()> {
        self.send(HostCommand::Upload(file))
    }

    pub fn delete_message(&self, message_id: MessageId) -> FeedResult<()> {
        self.send(HostCommand::DeleteMessage(message_id))
    }

    pub fn shutdown(&self) -> FeedResult<()> {
        self.send(HostCommand::Shutdown)
    }

    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        self.updates.recv().await
    }
}

/// Builds a session around `panel`. The returned worker must be polled (usually spawned)
/// for anything to happen.
pub fn create_session(
    backend: Arc<dyn Backend>,
    panel: ConversationPanel,
) -> (FeedSessionHandle, SessionWorker) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    let driver = SessionDriver {
        backend,
        panel,
        live: None,
        updates: update_tx,
    };

    let handle = FeedSessionHandle {
        commands: command_tx,
        updates: update_rx,
    };
    (handle, Box::pin(driver.run(command_rx)))
}

pub fn spawn_session(
    backend: Arc<dyn Backend>,
    panel: ConversationPanel,
) -> (FeedSessionHandle, JoinHandle<()>) {
    let (handle, worker) = create_session(backend, panel);
    (handle, tokio::spawn(worker))
}

struct LiveSubscription {
    generation: SubscriptionGeneration,
    channel: ChannelSubscription,
}

enum Response {
    History(HistoryRequest, FeedResult<HistoryPage>),
    Created(Ticket, FeedResult<Message>),
    Deleted(DeleteRequest, FeedResult<()>),
    Uploaded(Ticket, FeedResult<()>),
}

type InFlight = FuturesUnordered<BoxFuture<'static, Response>>;

struct SessionDriver {
    backend: Arc<dyn Backend>,
    panel: ConversationPanel,
    live: Option<LiveSubscription>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl SessionDriver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HostCommand>) {
        let mut in_flight = InFlight::new();
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(HostCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command, &mut in_flight),
                },
                Some(response) = in_flight.next(), if !in_flight.is_empty() => {
                    self.apply_response(response, &mut in_flight);
                }
                (generation, event) = recv_event(self.live.as_mut()), if self.live.is_some() => {
                    self.handle_event(generation, event);
                }
            }
            self.publish();
        }

        self.panel.close();
        self.release_subscription();
        tracing::info!("feed session stopped");
    }

    fn handle_command(&mut self, command: HostCommand, in_flight: &mut InFlight) {
        tracing::trace!(?command, "session command");
        match command {
            HostCommand::Open(parent_id) => {
                if let Ok(opened) = self.panel.open(parent_id) {
                    self.attach(opened, in_flight);
                }
            }
            HostCommand::ParentChanged(parent_id) => {
                if let Ok(Some(opened)) = self.panel.on_parent_changed(parent_id) {
                    self.attach(opened, in_flight);
                }
            }
            HostCommand::Close => {
                self.panel.close();
                self.release_subscription();
            }
            HostCommand::SendMessage(body) => {
                if let Ok(request) = self.panel.send_message(&body) {
                    in_flight.push(self.create(request));
                }
            }
            HostCommand::Key(event) => {
                if let Ok(Some(request)) = self.panel.handle_key(event) {
                    in_flight.push(self.create(request));
                }
            }
            HostCommand::SetComposerText(text) => self.panel.set_composer_text(text),
            HostCommand::InsertMention {
                display_name,
                user_id,
            } => self.panel.insert_mention(&display_name, user_id),
            HostCommand::LoadMore => {
                if let Ok(Some(request)) = self.panel.load_more() {
                    in_flight.push(self.fetch(request));
                }
            }
            HostCommand::Refresh => {
                if let Ok(request) = self.panel.refresh() {
                    in_flight.push(self.fetch(request));
                }
            }
            HostCommand::DeleteMessage(message_id) => {
                if let Ok(request) = self.panel.delete_message(message_id) {
                    in_flight.push(self.delete(request));
                }
            }
            HostCommand::Upload(file) => {
                if let Ok(request) = self.panel.upload(file) {
                    in_flight.push(self.upload(request));
                }
            }
            HostCommand::NoteInteraction => self.panel.note_user_interaction(),
            HostCommand::Shutdown => {}
        }
    }

    fn apply_response(&mut self, response: Response, in_flight: &mut InFlight) {
        match response {
            Response::History(request, result) => {
                let _ = self.panel.apply_history(request.ticket, result);
            }
            Response::Created(ticket, result) => {
                let _ = self.panel.apply_created(ticket, result);
            }
            Response::Deleted(request, result) => {
                let _ = self
                    .panel
                    .apply_deleted(request.ticket, request.message_id, result);
            }
            Response::Uploaded(ticket, result) => {
                if let Ok(outcome) = self.panel.apply_upload(ticket, result)
                    && let Some(refresh) = outcome.applied()
                {
                    in_flight.push(self.fetch(refresh));
                }
            }
        }
    }

    fn handle_event(&mut self, generation: SubscriptionGeneration, event: Option<WireChannelEvent>) {
        let Some(wire) = event else {
            tracing::warn!(generation = generation.0, "push channel ended");
            self.live = None;
            if self.panel.on_channel_lost(generation) {
                self.panel.report_error(FeedError::Network {
                    stage: "session-channel-ended",
                    operation: Operation::Subscribe,
                    source: ApiError::ChannelClosed {
                        stage: "session-channel-ended",
                    },
                });
            }
            return;
        };

        match ChannelEvent::try_from(wire) {
            Ok(event) => {
                self.panel.handle_channel_event(generation, event);
            }
            Err(error) => {
                tracing::warn!(%error, stage = error.stage(), "dropping invalid channel event");
            }
        }
    }

    /// Swaps in a fresh push subscription for `opened` and starts its first page fetch.
    fn attach(&mut self, opened: OpenedPanel, in_flight: &mut InFlight) {
        self.release_subscription();

        match self.backend.subscribe() {
            Ok(channel) => {
                self.live = Some(LiveSubscription {
                    generation: opened.subscription,
                    channel,
                });
            }
            Err(source) => {
                tracing::warn!(parent_id = %opened.parent_id, %source, "push subscribe failed");
                self.panel.report_error(FeedError::Network {
                    stage: "session-subscribe",
                    operation: Operation::Subscribe,
                    source,
                });
                self.panel.on_channel_lost(opened.subscription);
            }
        }

        in_flight.push(self.fetch(opened.history));
    }

    fn release_subscription(&mut self) {
        if let Some(live) = self.live.take() {
            self.backend.unsubscribe(live.channel);
        }
    }

    fn publish(&mut self) {
        let update = SessionUpdate {
            snapshot: self.panel.snapshot(),
            notices: self.panel.drain_notices(),
        };
        if self.updates.send(update).is_err() {
            tracing::trace!("session update dropped, host is gone");
        }
    }

    fn fetch(&self, request: HistoryRequest) -> BoxFuture<'static, Response> {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            let result = backend
                .fetch_history(request.query())
                .await
                .context(NetworkSnafu {
                    stage: "session-fetch-history",
                    operation: Operation::FetchHistory,
                })
                .map(|response| history_page_from_wire(response, request.parent_id));
            Response::History(request, result)
        })
    }

    fn create(&self, request: CreateRequest) -> BoxFuture<'static, Response> {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            let result = backend
                .create_message(request.parent_id.0, request.body)
                .await
                .context(NetworkSnafu {
                    stage: "session-create-message",
                    operation: Operation::SendMessage,
                })
                .and_then(|response| Message::try_from(response.data));
            Response::Created(request.ticket, result)
        })
    }

    fn delete(&self, request: DeleteRequest) -> BoxFuture<'static, Response> {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            let result = backend
                .delete_message(request.message_id.0)
                .await
                .context(NetworkSnafu {
                    stage: "session-delete-message",
                    operation: Operation::DeleteMessage,
                })
                .map(|_| ());
            Response::Deleted(request, result)
        })
    }

    fn upload(&self, request: UploadRequest) -> BoxFuture<'static, Response> {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            let result = backend
                .upload_attachment(request.parent_id.0, request.file)
                .await
                .context(NetworkSnafu {
                    stage: "session-upload-attachment",
                    operation: Operation::UploadAttachment,
                })
                .map(|_| ());
            Response::Uploaded(request.ticket, result)
        })
    }
}

async fn recv_event(
    live: Option<&mut LiveSubscription>,
) -> (SubscriptionGeneration, Option<WireChannelEvent>) {
    match live {
        Some(live) => (live.generation, live.channel.recv().await),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use huddle_api::{LoopbackBackend, LoopbackOperation, LoopbackUser, StaticAuthorizer};

    use super::*;
    use crate::error::ErrorKind;
    use crate::panel::PanelConfig;

    const ACTIVE: ConversationId = ConversationId::new(3);

    fn grace() -> LoopbackUser {
        LoopbackUser::new(2, "Grace")
    }

    fn start(backend: &Arc<LoopbackBackend>, page_size: u32) -> FeedSessionHandle {
        let config = PanelConfig {
            page_size,
            ..PanelConfig::default()
        };
        let panel = ConversationPanel::new(
            config,
            UserId::new(1),
            Arc::new(StaticAuthorizer::allow_all()),
        );
        let backend: Arc<dyn Backend> = backend.clone();
        let (handle, _task) = spawn_session(backend, panel);
        handle
    }

    /// Waits for the first update matching `predicate`, collecting notices seen on the way.
    async fn wait_for(
        handle: &mut FeedSessionHandle,
        predicate: impl Fn(&PanelSnapshot) -> bool,
    ) -> (PanelSnapshot, Vec<PanelNotice>) {
        let mut notices = Vec::new();
        let result = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(update) = handle.next_update().await {
                notices.extend(update.notices);
                if predicate(&update.snapshot) {
                    return Some(update.snapshot);
                }
            }
            None
        })
        .await
        .expect("session should publish in time")
        .expect("session should stay alive");
        (result, notices)
    }

    fn loaded(snapshot: &PanelSnapshot) -> bool {
        snapshot.parent_id == Some(ACTIVE) && !snapshot.loading
    }

    #[tokio::test]
    async fn open_loads_the_first_page() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        backend.seed_history(ACTIVE.0, &grace(), 25);
        let mut handle = start(&backend, 7);

        handle.open(ACTIVE).expect("open");
        let (snapshot, _) = wait_for(&mut handle, loaded).await;

        assert_eq!(snapshot.items.len(), 7);
        assert_eq!(snapshot.total, 25);
        assert!(snapshot.has_more);
        assert!(snapshot.subscribed);
        assert_eq!(backend.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn load_more_walks_to_the_oldest_message() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        backend.seed_history(ACTIVE.0, &grace(), 10);
        let mut handle = start(&backend, 4);

        handle.open(ACTIVE).expect("open");
        wait_for(&mut handle, loaded).await;
        handle.load_more().expect("load more");
        wait_for(&mut handle, |snapshot| !snapshot.loading && snapshot.items.len() == 8).await;
        handle.load_more().expect("load more");

        let (snapshot, _) =
            wait_for(&mut handle, |snapshot| !snapshot.loading && !snapshot.has_more).await;
        assert_eq!(snapshot.items.len(), 10);
    }

    #[tokio::test]
    async fn sent_message_appears_once_despite_push_echo() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        let mut handle = start(&backend, 20);

        handle.open(ACTIVE).expect("open");
        wait_for(&mut handle, loaded).await;
        handle
            .send(HostCommand::SetComposerText("hello".to_string()))
            .expect("type");
        handle.send_message("hello").expect("send");

        let (snapshot, _) = wait_for(&mut handle, |snapshot| {
            !snapshot.submitting && !snapshot.items.is_empty()
        })
        .await;
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].body, "hello");
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.composer_text, "");
        assert_eq!(backend.message_count(ACTIVE.0), 1);
    }

    #[tokio::test]
    async fn background_message_raises_notice_and_unread() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        let mut handle = start(&backend, 20);

        handle.open(ACTIVE).expect("open");
        wait_for(&mut handle, loaded).await;
        backend.post_as(7, &grace(), "over here");

        let (snapshot, notices) =
            wait_for(&mut handle, |snapshot| !snapshot.unread.is_empty()).await;
        assert!(snapshot.items.is_empty());
        assert_eq!(snapshot.unread, vec![(ConversationId::new(7), 1)]);
        let backgrounds = notices
            .iter()
            .filter_map(PanelNotice::as_background)
            .collect::<Vec<_>>();
        assert_eq!(backgrounds.len(), 1);
        assert_eq!(backgrounds[0].preview, "over here");
    }

    #[tokio::test]
    async fn close_releases_the_subscription() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        let mut handle = start(&backend, 20);

        handle.open(ACTIVE).expect("open");
        wait_for(&mut handle, loaded).await;
        handle.close().expect("close");
        let (snapshot, _) = wait_for(&mut handle, |snapshot| snapshot.parent_id.is_none()).await;

        assert!(!snapshot.subscribed);
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn upload_refreshes_the_feed() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        let mut handle = start(&backend, 20);

        handle.open(ACTIVE).expect("open");
        wait_for(&mut handle, loaded).await;
        handle
            .upload(AttachmentUpload::new("roster.csv", b"a,b\n".to_vec()))
            .expect("upload");

        let (snapshot, _) = wait_for(&mut handle, |snapshot| {
            snapshot.pending_upload.is_none() && !snapshot.loading && !snapshot.items.is_empty()
        })
        .await;
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].attachments[0].name, "roster.csv");
        assert_eq!(backend.call_count(LoopbackOperation::FetchHistory), 2);
    }

    #[tokio::test]
    async fn failed_history_fetch_surfaces_a_network_error() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        backend.fail_next(LoopbackOperation::FetchHistory, "offline");
        let mut handle = start(&backend, 20);

        handle.open(ACTIVE).expect("open");
        let (snapshot, notices) = wait_for(&mut handle, |snapshot| {
            snapshot.parent_id == Some(ACTIVE) && !snapshot.loading
        })
        .await;

        assert!(snapshot.items.is_empty());
        let kinds = notices
            .iter()
            .filter_map(PanelNotice::as_error)
            .map(|error| error.kind)
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec![ErrorKind::Network]);
    }

    #[tokio::test]
    async fn failed_subscribe_reports_unsubscribed() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        backend.shutdown();
        let mut handle = start(&backend, 20);

        handle.open(ACTIVE).expect("open");
        let (snapshot, notices) = wait_for(&mut handle, loaded).await;

        assert!(!snapshot.subscribed);
        assert!(notices.iter().any(|notice| notice.as_error().is_some()));
    }

    #[tokio::test]
    async fn ended_push_channel_reports_unsubscribed() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        let mut handle = start(&backend, 20);

        handle.open(ACTIVE).expect("open");
        let (snapshot, _) = wait_for(&mut handle, loaded).await;
        assert!(snapshot.subscribed);

        backend.shutdown();
        let (snapshot, notices) = wait_for(&mut handle, |snapshot| !snapshot.subscribed).await;

        assert_eq!(snapshot.parent_id, Some(ACTIVE));
        let kinds = notices
            .iter()
            .filter_map(PanelNotice::as_error)
            .map(|error| error.kind)
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec![ErrorKind::Network]);
    }

    #[tokio::test]
    async fn invalid_channel_payload_is_skipped() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        let mut handle = start(&backend, 20);

        handle.open(ACTIVE).expect("open");
        wait_for(&mut handle, loaded).await;
        backend
            .inject_raw(r#"{"type":"new-message","message":{"id":0,"parentId":3,"authorId":2,"body":"bad"}}"#)
            .expect("inject");
        backend.post_as(ACTIVE.0, &grace(), "good");

        let (snapshot, _) = wait_for(&mut handle, |snapshot| !snapshot.items.is_empty()).await;
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].body, "good");
    }

    #[tokio::test]
    async fn commands_fail_after_shutdown() {
        let backend = Arc::new(LoopbackBackend::new(LoopbackUser::new(1, "Ada")));
        let config = PanelConfig::default();
        let panel = ConversationPanel::new(
            config,
            UserId::new(1),
            Arc::new(StaticAuthorizer::allow_all()),
        );
        let (handle, task) = spawn_session(backend, panel);

        handle.shutdown().expect("shutdown");
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("session stops")
            .expect("task joins");

        let error = handle.open(ACTIVE).expect_err("closed");
        assert_eq!(error.kind(), ErrorKind::State);
    }
}
