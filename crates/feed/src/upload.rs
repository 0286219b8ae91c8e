use huddle_api::AttachmentUpload;
use snafu::ensure;

use crate::error::{BusySnafu, Capability, FeedResult, Operation, PermissionDeniedSnafu};
use crate::message::ConversationId;
use crate::ticket::{Completion, Ticket};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub ticket: Ticket,
    pub parent_id: ConversationId,
    pub file: AttachmentUpload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingUpload {
    ticket: Ticket,
    file_name: String,
}

/// One-slot attachment queue bound to the open conversation.
///
/// Nothing is inserted into the feed on success; the caller refreshes instead, since the
/// server decides how the attachment is represented.
#[derive(Debug, Clone, Default)]
pub struct UploadQueue {
    pending: Option<PendingUpload>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_file(&self) -> Option<&str> {
        self.pending.as_ref().map(|pending| pending.file_name.as_str())
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn begin(
        &mut self,
        file: AttachmentUpload,
        can_post: bool,
        parent_id: ConversationId,
        ticket: Ticket,
    ) -> FeedResult<UploadRequest> {
        ensure!(
            can_post,
            PermissionDeniedSnafu {
                stage: "upload-check-permission",
                capability: Capability::Post,
            }
        );
        ensure!(
            self.pending.is_none(),
            BusySnafu {
                stage: "upload-check-pending",
                operation: Operation::UploadAttachment,
            }
        );

        self.pending = Some(PendingUpload {
            ticket,
            file_name: file.file_name.clone(),
        });
        tracing::debug!(
            parent_id = %parent_id,
            file_name = %file.file_name,
            size_bytes = file.bytes.len(),
            "attachment upload started"
        );

        Ok(UploadRequest {
            ticket,
            parent_id,
            file,
        })
    }

    /// Clears the pending slot for `ticket`. Returns `Applied(())` when the caller should
    /// refresh, an error when the upload failed.
    pub fn complete<T>(&mut self, ticket: Ticket, result: FeedResult<T>) -> FeedResult<Completion<()>> {
        let Some(pending) = self.pending.take_if(|pending| pending.ticket == ticket) else {
            tracing::debug!(?ticket, "dropping stale upload response");
            return Ok(Completion::Stale);
        };

        match result {
            Ok(_) => {
                tracing::debug!(file_name = %pending.file_name, "attachment upload finished");
                Ok(Completion::Applied(()))
            }
            Err(error) => {
                tracing::debug!(file_name = %pending.file_name, %error, "attachment upload discarded");
                Err(error)
            }
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
