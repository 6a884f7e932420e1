//! The message-delivery stage of a pub/sub broker.
//!
//! This crate takes messages that are already matched to a subscriber and
//! gets them delivered, handling every way delivery can fail without losing
//! the message or stalling other subscribers.
//!
//! ## Guarantees
//! - Every channel is owned by exactly one delivery handler
//! - Per-channel ordering, without locks
//! - Failed sends are rolled back before any recovery
//! - No failure in one delivery affects another
//!
//! ## Recovery policy
//! - Stale message: rollback, discard
//! - Failure flagged upstream: rollback, dead-letter
//! - Rule violation: rollback, dead-letter (queues only; topics are discarded)
//! - Transient failure or inactive subscriber: rollback, then requeue for
//!   durable subscribers or drop for everyone else
//! - Anything else: logged and swallowed
//!
//! ## Non-Guarantees
//! - Ordering across channels
//! - Durability of requeue and dead-letter moves (the engine's concern)
//! - Subscription matching and message persistence

mod dead_letter;
mod dispatcher;
mod engine;
mod error;
mod event;
mod ring;
mod rollback;
mod shard;
mod subscription;
mod telemetry;
mod types;
mod worker;

pub use dead_letter::DeadLetterRouter;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use engine::{DeadLetterService, InMemoryEngine, RequeueService, DEFAULT_DEAD_LETTER_QUEUE};
pub use error::{
    ConfigError,
    DeliveryOutcome,
    DeliveryReport,
    DropReason,
    PublishError,
    SendFailure,
    StoreError,
};
pub use event::DeliveryEvent;
pub use ring::DeliveryRing;
pub use rollback::on_send_error;
pub use shard::{partition, shard_for_channel};
pub use subscription::{SubscriberTransport, Subscription};
pub use telemetry::{
    CounterMetrics,
    LogTracer,
    MessageTracer,
    MetricsSink,
    TraceKind,
    MSG_DEAD_LETTERED,
    MSG_REQUEUED,
    MSG_SENT_RATE,
};
pub use types::{ChannelId, DeadLetterEntry, MessageContent, MessageId, MessageKind, MessageMetadata};
pub use worker::{Collaborators, DeliveryEventHandler, DeliveryStats};
