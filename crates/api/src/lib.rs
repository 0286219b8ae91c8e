#![deny(unsafe_code)]

//! Collaborator contracts for the conversation feed: the request/response API, the push
//! channel, capability checks, and the wire payloads they exchange.

mod backend;
mod loopback;
mod wire;

pub use backend::{
    ApiError, ApiResult, Authorizer, Backend, BoxFuture, ChannelSubscription, ConversationApi,
    HistoryQuery, PushChannel, StaticAuthorizer, SubscriptionId,
};
pub use loopback::{
    LOOPBACK_BACKEND_ID, LoopbackBackend, LoopbackOperation, LoopbackUser,
    ensure_supported_backend,
};
pub use wire::{
    AttachmentUpload, CreateResponse, DeleteResponse, HistoryResponse, PageMeta, UploadAck,
    WireAttachment, WireChannelEvent, WireMessage, decode_channel_event, encode_channel_event,
};
