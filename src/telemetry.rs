use crate::types::MessageMetadata;

/// Counter bumped once per successful hand-off to a subscriber.
pub const MSG_SENT_RATE: &str = "delivery.message.sent";
pub const MSG_REQUEUED: &str = "delivery.message.requeued";
pub const MSG_DEAD_LETTERED: &str = "delivery.message.dead_lettered";

/// Sink for named counters.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str);
}

/// Forwards to the `metrics` facade when the `metrics` feature is on.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterMetrics;

#[cfg(feature = "metrics")]
impl MetricsSink for CounterMetrics {
    fn increment(&self, name: &'static str) {
        metrics::increment_counter!(name);
    }
}

#[cfg(not(feature = "metrics"))]
impl MetricsSink for CounterMetrics {
    fn increment(&self, _name: &'static str) {}
}

/// Lifecycle points a message can be traced at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    DispatchedToProtocol,
    DiscardStaleMessage,
    MovedToDeadLetter,
}

impl TraceKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            TraceKind::DispatchedToProtocol => "dispatched_to_protocol",
            TraceKind::DiscardStaleMessage => "discard_stale_message",
            TraceKind::MovedToDeadLetter => "moved_to_dead_letter",
        }
    }
}

/// Per-message trace emitter.
pub trait MessageTracer: Send + Sync {
    fn trace(&self, kind: TraceKind, message: &MessageMetadata);
}

/// Emits trace points as `tracing` debug events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl MessageTracer for LogTracer {
    fn trace(&self, kind: TraceKind, message: &MessageMetadata) {
        tracing::debug!(
            trace = kind.as_label(),
            message_id = %message.id(),
            destination = message.destination(),
            "message trace"
        );
    }
}
