use std::sync::Arc;

use tracing::{error, warn};

use crate::engine::DeadLetterService;
use crate::error::{DeliveryOutcome, DropReason};
use crate::telemetry::{MessageTracer, MetricsSink, TraceKind, MSG_DEAD_LETTERED};
use crate::types::MessageMetadata;

/// Routes undeliverable messages to the dead-letter queue.
///
/// Queue messages are moved into `dead_letter_queue`, keyed by their
/// original destination. Topics
/// have no dead-letter queue, so topic messages are discarded with a warning.
#[derive(Clone)]
pub struct DeadLetterRouter {
    service: Arc<dyn DeadLetterService>,
    dead_letter_queue: String,
    tracer: Arc<dyn MessageTracer>,
    metrics: Arc<dyn MetricsSink>,
}

impl DeadLetterRouter {
    pub fn new(
        service: Arc<dyn DeadLetterService>,
        dead_letter_queue: impl Into<String>,
        tracer: Arc<dyn MessageTracer>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            service,
            dead_letter_queue: dead_letter_queue.into(),
            tracer,
            metrics,
        }
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter_queue
    }

    pub async fn route(&self, message: &MessageMetadata) -> DeliveryOutcome {
        if message.is_topic() {
            warn!(
                message_id = %message.id(),
                destination = message.destination(),
                "discarding topic message {} as delivery failed",
                message.id()
            );
            return DeliveryOutcome::Dropped(DropReason::TopicNoDeadLetter);
        }

        warn!(
            message_id = %message.id(),
            destination = message.destination(),
            dead_letter_queue = %self.dead_letter_queue,
            "moving message {} to dead letter queue due to send error",
            message.id()
        );

        match self
            .service
            .move_to_dead_letter(message, message.destination(), &self.dead_letter_queue)
            .await
        {
            Ok(()) => {
                self.tracer.trace(TraceKind::MovedToDeadLetter, message);
                self.metrics.increment(MSG_DEAD_LETTERED);
                DeliveryOutcome::DeadLettered
            }
            Err(err) => {
                // Store-level failure: the message may be lost, or left
                // referenced by a slot that never gets released.
                error!(
                    message_id = %message.id(),
                    destination = message.destination(),
                    error = %err,
                    "error moving message {} to dead letter queue",
                    message.id()
                );
                DeliveryOutcome::Dropped(DropReason::DeadLetterFailed)
            }
        }
    }
}
