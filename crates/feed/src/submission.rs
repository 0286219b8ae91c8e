use snafu::ensure;

use crate::composer::Composer;
use crate::error::{BusySnafu, Capability, EmptyBodySnafu, FeedResult, Operation, PermissionDeniedSnafu};
use crate::feed::FeedState;
use crate::mention;
use crate::message::{ConversationId, Message};
use crate::ticket::{Completion, Ticket};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub ticket: Ticket,
    pub parent_id: ConversationId,
    pub body: String,
}

#[derive(Debug, Clone)]
struct InFlightSend {
    ticket: Ticket,
    draft: String,
}

/// Validates, tracks, and reflects one outbound message at a time.
#[derive(Debug, Clone, Default)]
pub struct SubmissionPipeline {
    in_flight: Option<InFlightSend>,
}

impl SubmissionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Checks run in order: empty body, posting capability, in-flight send. Nothing is
    /// issued when any of them fails.
    pub fn begin(
        &mut self,
        body: &str,
        can_post: bool,
        parent_id: ConversationId,
        ticket: Ticket,
    ) -> FeedResult<CreateRequest> {
        ensure!(
            !body.trim().is_empty(),
            EmptyBodySnafu {
                stage: "send-validate-body",
            }
        );
        ensure!(
            can_post,
            PermissionDeniedSnafu {
                stage: "send-check-permission",
                capability: Capability::Post,
            }
        );
        ensure!(
            self.in_flight.is_none(),
            BusySnafu {
                stage: "send-check-in-flight",
                operation: Operation::SendMessage,
            }
        );

        self.in_flight = Some(InFlightSend {
            ticket,
            draft: body.to_string(),
        });
        Ok(CreateRequest {
            ticket,
            parent_id,
            body: mention::strip_tokens(body),
        })
    }

    /// Applies the create response.
    ///
    /// Success merges the server record as newer (a no-op if the push echo already landed)
    /// and clears the composer, unless the draft changed while the send was in flight.
    /// Failure leaves the composer text in place.
    pub fn complete(
        &mut self,
        feed: &mut FeedState,
        composer: &mut Composer,
        ticket: Ticket,
        result: FeedResult<Message>,
    ) -> FeedResult<Completion<bool>> {
        let Some(send) = self.in_flight.take_if(|send| send.ticket == ticket) else {
            tracing::debug!(?ticket, "dropping stale create response");
            return Ok(Completion::Stale);
        };

        let message = result?;
        let message_id = message.id;
        let inserted = feed.apply_newer(message);
        if composer.text() == send.draft {
            composer.clear();
        } else {
            tracing::debug!(%message_id, "composer edited during send, keeping draft");
        }

        tracing::debug!(%message_id, inserted, "created message reflected in feed");
        Ok(Completion::Applied(inserted))
    }

    pub fn cancel(&mut self) {
        self.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use huddle_api::ApiError;

    use super::*;
    use crate::error::{ErrorKind, FeedError};
    use crate::message::{MessageId, UserId};
    use crate::ticket::PanelGeneration;

    const PARENT: ConversationId = ConversationId::new(3);

    fn ticket(sequence: u64) -> Ticket {
        Ticket::new(PanelGeneration::new(1), sequence)
    }

    fn created(id: u64, body: &str) -> Message {
        Message::new(MessageId::new(id), PARENT, UserId::new(1), body)
    }

    #[test]
    fn blank_body_is_a_validation_error() {
        let mut pipeline = SubmissionPipeline::new();
        let error = pipeline
            .begin("  \n ", true, PARENT, ticket(1))
            .expect_err("blank body");
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(!pipeline.is_submitting());
    }

    #[test]
    fn validation_is_checked_before_permission() {
        let mut pipeline = SubmissionPipeline::new();
        let error = pipeline
            .begin("", false, PARENT, ticket(1))
            .expect_err("blank body");
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn missing_post_capability_is_a_permission_error() {
        let mut pipeline = SubmissionPipeline::new();
        let error = pipeline
            .begin("hello", false, PARENT, ticket(1))
            .expect_err("denied");
        assert_eq!(error.kind(), ErrorKind::Permission);
        assert!(!pipeline.is_submitting());
    }

    #[test]
    fn second_send_while_in_flight_is_rejected() {
        let mut pipeline = SubmissionPipeline::new();
        pipeline
            .begin("one", true, PARENT, ticket(1))
            .expect("first send");
        let error = pipeline
            .begin("two", true, PARENT, ticket(2))
            .expect_err("busy");
        assert_eq!(error.kind(), ErrorKind::State);
    }

    #[test]
    fn outbound_body_has_mention_metadata_stripped() {
        let mut pipeline = SubmissionPipeline::new();
        let request = pipeline
            .begin("hi @[Grace](user:2)", true, PARENT, ticket(1))
            .expect("send");
        assert_eq!(request.body, "hi @Grace");
    }

    #[test]
    fn success_after_push_echo_keeps_one_copy_and_clears_composer() {
        let mut pipeline = SubmissionPipeline::new();
        let mut feed = FeedState::new();
        let mut composer = Composer::new();
        composer.set_text("hello");

        let request = pipeline
            .begin(composer.text(), true, PARENT, ticket(1))
            .expect("send");
        feed.apply_newer(created(40, "hello"));

        let outcome = pipeline
            .complete(&mut feed, &mut composer, request.ticket, Ok(created(40, "hello")))
            .expect("applies");

        assert_eq!(outcome, Completion::Applied(false));
        assert_eq!(feed.len(), 1);
        assert_eq!(composer.text(), "");
        assert!(!pipeline.is_submitting());
    }

    #[test]
    fn draft_typed_during_send_survives_success() {
        let mut pipeline = SubmissionPipeline::new();
        let mut feed = FeedState::new();
        let mut composer = Composer::new();
        composer.set_text("first");

        let request = pipeline
            .begin(composer.text(), true, PARENT, ticket(1))
            .expect("send");
        composer.set_text("second thought");

        pipeline
            .complete(&mut feed, &mut composer, request.ticket, Ok(created(41, "first")))
            .expect("applies");

        assert_eq!(feed.len(), 1);
        assert_eq!(composer.text(), "second thought");
        assert!(!pipeline.is_submitting());
    }

    #[test]
    fn stale_ticket_leaves_the_send_in_flight() {
        let mut pipeline = SubmissionPipeline::new();
        let mut feed = FeedState::new();
        let mut composer = Composer::new();
        pipeline
            .begin("hello", true, PARENT, ticket(2))
            .expect("send");

        let outcome = pipeline
            .complete(&mut feed, &mut composer, ticket(1), Ok(created(40, "hello")))
            .expect("stale is not an error");

        assert!(outcome.is_stale());
        assert!(feed.is_empty());
        assert!(pipeline.is_submitting());
    }

    #[test]
    fn failure_keeps_composer_text() {
        let mut pipeline = SubmissionPipeline::new();
        let mut feed = FeedState::new();
        let mut composer = Composer::new();
        composer.set_text("keep me");

        let request = pipeline
            .begin(composer.text(), true, PARENT, ticket(1))
            .expect("send");
        let failure = Err(FeedError::Network {
            stage: "test",
            operation: Operation::SendMessage,
            source: ApiError::ChannelClosed { stage: "test" },
        });

        assert!(
            pipeline
                .complete(&mut feed, &mut composer, request.ticket, failure)
                .is_err()
        );
        assert_eq!(composer.text(), "keep me");
        assert!(feed.is_empty());
        assert!(!pipeline.is_submitting());
    }
}
