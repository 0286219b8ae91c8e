#![deny(unsafe_code)]

//! Conversation feed synchronization engine.
//!
//! Keeps one open conversation's message feed consistent while history pages, push
//! events, and the user's own sends and deletes arrive in any order.

mod boundary;
mod composer;
mod error;
mod events;
mod feed;
mod mention;
mod merge;
mod message;
mod notification;
mod pagination;
mod panel;
mod router;
mod session;
mod submission;
mod ticket;
mod unread;
mod upload;

pub use boundary::{HistoryPage, history_page_from_wire};
pub use composer::{COMPOSER_HINT, Composer, ComposerAction, Key, KeyEvent, KeyState};
pub use error::{Capability, ErrorKind, FeedError, FeedResult, Operation};
pub use events::{Alert, BackgroundNotice, ChannelEvent, PanelNotice, SurfacedError, preview_text};
pub use feed::FeedState;
pub use mention::{encode_token, strip_tokens};
pub use merge::{MergePosition, has_unique_ids, merge, merge_into};
pub use message::{Attachment, ConversationId, Message, MessageId, UserId};
pub use notification::{NotificationContext, NotificationPolicy, NotificationScope};
pub use pagination::{DEFAULT_PAGE_SIZE, FetchKind, HistoryRequest, PaginationCursor};
pub use panel::{
    ConversationPanel, DeleteRequest, OpenedPanel, PanelConfig, PanelLifecycle, PanelSnapshot,
};
pub use router::{
    ChannelRouter, ChannelState, ChannelTransition, ChannelTransitionRejection,
    ChannelTransitionResult, DEFAULT_PREVIEW_CHARS, Route, SubscriptionGeneration,
};
pub use session::{
    FeedSessionHandle, HostCommand, SessionUpdate, SessionWorker, create_session, spawn_session,
};
pub use submission::{CreateRequest, SubmissionPipeline};
pub use ticket::{Completion, PanelGeneration, Ticket};
pub use unread::UnreadCounts;
pub use upload::{UploadQueue, UploadRequest};
