use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use crate::dead_letter::DeadLetterRouter;
use crate::engine::{DeadLetterService, RequeueService, DEFAULT_DEAD_LETTER_QUEUE};
use crate::error::{DeliveryOutcome, DeliveryReport, DropReason, SendFailure};
use crate::event::DeliveryEvent;
use crate::ring::DeliveryRing;
use crate::rollback;
use crate::shard::shard_for_channel;
use crate::subscription::Subscription;
use crate::telemetry::{
    CounterMetrics, LogTracer, MessageTracer, MetricsSink, TraceKind, MSG_REQUEUED, MSG_SENT_RATE,
};
use crate::types::{MessageContent, MessageMetadata};

/// External services a handler reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub requeue: Arc<dyn RequeueService>,
    pub dead_letter: Arc<dyn DeadLetterService>,
    /// Queue that undeliverable queue messages are moved to.
    pub dead_letter_queue: String,
    pub tracer: Arc<dyn MessageTracer>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Collaborators {
    pub fn new(requeue: Arc<dyn RequeueService>, dead_letter: Arc<dyn DeadLetterService>) -> Self {
        Self {
            requeue,
            dead_letter,
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
            tracer: Arc::new(LogTracer),
            metrics: Arc::new(CounterMetrics),
        }
    }

    /// Use one engine for both requeue and dead-letter moves.
    pub fn from_engine<E>(engine: Arc<E>) -> Self
    where
        E: RequeueService + DeadLetterService + 'static,
    {
        Self::new(engine.clone(), engine)
    }

    pub fn with_dead_letter_queue(mut self, name: impl Into<String>) -> Self {
        self.dead_letter_queue = name.into();
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn MessageTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Counters for one handler, or summed across a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub seen: u64,
    pub owned: u64,
    pub delivered: u64,
    pub rollbacks: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
    pub unhandled: u64,
}

impl DeliveryStats {
    pub fn merge(mut self, other: DeliveryStats) -> Self {
        self.seen += other.seen;
        self.owned += other.owned;
        self.delivered += other.delivered;
        self.rollbacks += other.rollbacks;
        self.requeued += other.requeued;
        self.dead_lettered += other.dead_lettered;
        self.dropped += other.dropped;
        self.unhandled += other.unhandled;
        self
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    seen: AtomicU64,
    owned: AtomicU64,
    delivered: AtomicU64,
    rollbacks: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
    unhandled: AtomicU64,
}

impl StatCounters {
    fn record(&self, outcome: &DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered => &self.delivered,
            DeliveryOutcome::Requeued => &self.requeued,
            DeliveryOutcome::DeadLettered => &self.dead_lettered,
            DeliveryOutcome::Dropped(_) => &self.dropped,
            DeliveryOutcome::Unhandled => &self.unhandled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            seen: self.seen.load(Ordering::Relaxed),
            owned: self.owned.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
        }
    }
}

/// Final stage of the delivery ring: sends one message to one subscriber.
///
/// Every handler sees every event; a handler only acts on events whose
/// channel partitions to its ordinal. That gives per-channel ordering
/// without locks, since a channel is always served by the same handler.
pub struct DeliveryEventHandler {
    ordinal: usize,
    handler_count: usize,
    requeue: Arc<dyn RequeueService>,
    dead_letter: DeadLetterRouter,
    tracer: Arc<dyn MessageTracer>,
    metrics: Arc<dyn MetricsSink>,
    stats: StatCounters,
}

impl DeliveryEventHandler {
    pub fn new(ordinal: usize, handler_count: usize, collaborators: Collaborators) -> Self {
        let dead_letter = DeadLetterRouter::new(
            collaborators.dead_letter,
            collaborators.dead_letter_queue,
            collaborators.tracer.clone(),
            collaborators.metrics.clone(),
        );
        Self {
            ordinal,
            handler_count: handler_count.max(1),
            requeue: collaborators.requeue,
            dead_letter,
            tracer: collaborators.tracer,
            metrics: collaborators.metrics,
            stats: StatCounters::default(),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.snapshot()
    }

    /// Whether the event's channel belongs to this handler.
    ///
    /// An empty slot is owned by nobody.
    pub fn owns(&self, event: &DeliveryEvent) -> bool {
        event
            .subscription()
            .map(|s| shard_for_channel(&s.channel_id(), self.handler_count) == self.ordinal)
            .unwrap_or(false)
    }

    /// Process one event from the ring.
    ///
    /// Returns `None` for events owned by another handler, leaving them
    /// untouched. For owned events the slot is always cleared, and no
    /// failure escapes.
    pub async fn on_event(
        &self,
        event: &mut DeliveryEvent,
        sequence: u64,
        end_of_batch: bool,
    ) -> Option<DeliveryReport> {
        self.stats.seen.fetch_add(1, Ordering::Relaxed);
        if end_of_batch {
            trace!(ordinal = self.ordinal, sequence, "end of batch");
        }

        if !self.owns(event) {
            return None;
        }
        self.stats.owned.fetch_add(1, Ordering::Relaxed);

        // Taking the contents clears the slot before any send is attempted.
        let (subscription, message, content, error_occurred) = event.take().into_parts();
        let (Some(subscription), Some(message)) = (subscription, message) else {
            return None;
        };
        let content = content.unwrap_or_default();

        let outcome = match AssertUnwindSafe(self.dispatch(
            &subscription,
            &message,
            &content,
            error_occurred,
        ))
        .catch_unwind()
        .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    message_id = %message.id(),
                    channel = %subscription.channel_id(),
                    panic = panic_message(&*panic),
                    "unexpected error while delivering message {}",
                    message.id()
                );
                DeliveryOutcome::Unhandled
            }
        };

        self.stats.record(&outcome);
        Some(DeliveryReport {
            message_id: message.id(),
            channel: subscription.channel_id(),
            outcome,
        })
    }

    async fn dispatch(
        &self,
        subscription: &Subscription,
        message: &Arc<MessageMetadata>,
        content: &MessageContent,
        error_occurred: bool,
    ) -> DeliveryOutcome {
        if error_occurred {
            self.rollback(message, subscription);
            return self.dead_letter.route(message).await;
        }

        if message.is_stale() {
            self.rollback(message, subscription);
            self.tracer.trace(TraceKind::DiscardStaleMessage, message);
            return DeliveryOutcome::Dropped(DropReason::Stale);
        }

        if !subscription.is_active() {
            self.rollback(message, subscription);
            return self.recover_undelivered(message, subscription).await;
        }

        match subscription.send(message, content).await {
            Ok(()) => {
                self.tracer.trace(TraceKind::DispatchedToProtocol, message);
                self.metrics.increment(MSG_SENT_RATE);
                DeliveryOutcome::Delivered
            }
            Err(SendFailure::RuleViolation(reason)) => {
                trace!(message_id = %message.id(), reason = %reason, "delivery rule violated");
                self.rollback(message, subscription);
                self.dead_letter.route(message).await
            }
            Err(SendFailure::Transient(reason)) => {
                trace!(message_id = %message.id(), reason = %reason, "transient delivery failure");
                self.rollback(message, subscription);
                self.recover_undelivered(message, subscription).await
            }
            Err(failure @ SendFailure::Unexpected(_)) => {
                error!(
                    message_id = %message.id(),
                    channel = %subscription.channel_id(),
                    error = %failure,
                    "unexpected error while delivering message {}",
                    message.id()
                );
                DeliveryOutcome::Unhandled
            }
        }
    }

    fn rollback(&self, message: &MessageMetadata, subscription: &Subscription) {
        rollback::on_send_error(message, subscription);
        self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Closed or broken channel: durable subscribers get the message
    /// requeued, everyone else drops it.
    async fn recover_undelivered(
        &self,
        message: &Arc<MessageMetadata>,
        subscription: &Subscription,
    ) -> DeliveryOutcome {
        if subscription.is_durable() {
            self.requeue.requeue(Arc::clone(message)).await;
            self.metrics.increment(MSG_REQUEUED);
            return DeliveryOutcome::Requeued;
        }

        if message.is_ok_to_dispose() {
            return DeliveryOutcome::Dropped(DropReason::Disposable);
        }

        warn!(
            message_id = %message.id(),
            channel = %subscription.channel_id(),
            "cannot send message id={} as subscriber is closed",
            message.id()
        );
        DeliveryOutcome::Dropped(DropReason::SubscriberClosed)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handler loop driven by sequence announcements from the ring.
///
/// Each handler:
/// - Checks ownership under the slot lock
/// - Takes owned events out of the slot, then dispatches without the lock
/// - Releases the slot so the producer can reuse it
pub(crate) async fn worker_loop(
    handler: Arc<DeliveryEventHandler>,
    ring: Arc<DeliveryRing>,
    mut rx: mpsc::Receiver<u64>,
    report_tx: Option<mpsc::UnboundedSender<DeliveryReport>>,
) {
    while let Some(sequence) = rx.recv().await {
        let mut claimed = ring.claim_if(sequence, |event| handler.owns(event));
        ring.release(sequence);

        let end_of_batch = rx.is_empty();
        if let Some(report) = handler.on_event(&mut claimed, sequence, end_of_batch).await {
            if let Some(tx) = &report_tx {
                let _ = tx.send(report);
            }
        }
    }
}
