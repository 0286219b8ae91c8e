use std::cmp::Ordering;
use std::fmt;

/// Stable identifier for one conversation (the message `parentId`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub u64);

impl ConversationId {
    /// Creates a typed conversation identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub u64);

impl UserId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
}

/// Validated, immutable message as it lives in a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub parent_id: ConversationId,
    pub author_id: UserId,
    pub author_name: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub created_at_unix_seconds: u64,
}

impl Message {
    pub fn new(
        id: MessageId,
        parent_id: ConversationId,
        author_id: UserId,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id,
            parent_id,
            author_id,
            author_name: String::new(),
            body: body.into(),
            attachments: Vec::new(),
            created_at_unix_seconds: 0,
        }
    }

    pub fn with_author_name(mut self, author_name: impl Into<String>) -> Self {
        self.author_name = author_name.into();
        self
    }

    pub fn with_created_at(mut self, created_at_unix_seconds: u64) -> Self {
        self.created_at_unix_seconds = created_at_unix_seconds;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Newest-first ordering key: creation time, then id for same-second writes.
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        self.created_at_unix_seconds
            .cmp(&other.created_at_unix_seconds)
            .then_with(|| self.id.cmp(&other.id))
    }

    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.recency_cmp(other) == Ordering::Greater
    }
}
