use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::backend::{ApiResult, DecodeEventSnafu};

/// Attachment metadata as the conversation API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAttachment {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Loosely typed message payload.
///
/// Optional fields mirror what the API is allowed to omit; callers validate the payload
/// before letting it into any feed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: u64,
    pub parent_id: u64,
    pub author_id: u64,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: u64,
    pub page: u64,
    pub page_count: u64,
}

/// Response body of the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub items: Vec<WireMessage>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub data: WireMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub file_name: String,
    pub size_bytes: u64,
}

/// Binary payload handed to the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl AttachmentUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            bytes,
        }
    }
}

/// Push channel event as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireChannelEvent {
    NewMessage {
        message: WireMessage,
    },
    MessageDeleted {
        id: u64,
        #[serde(rename = "parentId")]
        parent_id: u64,
    },
}

impl WireChannelEvent {
    pub fn parent_id(&self) -> u64 {
        match self {
            Self::NewMessage { message } => message.parent_id,
            Self::MessageDeleted { parent_id, .. } => *parent_id,
        }
    }
}

/// Decodes one raw channel frame. Unknown `type` tags are rejected here.
pub fn decode_channel_event(raw: &str) -> ApiResult<WireChannelEvent> {
    serde_json::from_str(raw).context(DecodeEventSnafu {
        stage: "decode-channel-event",
    })
}

pub fn encode_channel_event(event: &WireChannelEvent) -> ApiResult<String> {
    serde_json::to_string(event).context(DecodeEventSnafu {
        stage: "encode-channel-event",
    })
}
