use std::fmt;

use thiserror::Error;

use crate::types::{ChannelId, MessageId};

/// Classified failure of a single send to a subscriber.
///
/// The set is closed: the dispatcher matches on it exhaustively to pick
/// rollback, requeue or dead-letter handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendFailure {
    /// The protocol rejected the message for a reason that will recur.
    #[error("delivery rule violated: {0}")]
    RuleViolation(String),

    /// The channel failed in a way another subscriber may not hit.
    /// Connection resets and closed sockets land here.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Anything the transport could not classify, including panics.
    #[error("unexpected delivery failure: {0}")]
    Unexpected(String),
}

/// Errors raised by the message store while moving a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("failed to move message {message_id} to {dead_letter_queue}: {reason}")]
    DeadLetterMove {
        message_id: MessageId,
        dead_letter_queue: String,
        reason: String,
    },
}

/// Errors returned when handing an event to the delivery pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The pool has been shut down.
    #[error("delivery pool is shut down")]
    Shutdown,
}

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid delivery config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result of dispatching one owned event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    pub channel: ChannelId,
    pub outcome: DeliveryOutcome,
}

/// What happened to a message on this channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to the subscriber's transport.
    Delivered,

    /// Returned to the broker for another durable subscriber.
    Requeued,

    /// Moved to the dead-letter queue.
    DeadLettered,

    /// Not delivered on this channel and not recovered.
    Dropped(DropReason),

    /// Send failed in an unclassified way; logged and swallowed.
    Unhandled,
}

/// Reasons a message was dropped for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Expired or superseded before delivery.
    Stale,

    /// Topics have no dead-letter queue.
    TopicNoDeadLetter,

    /// Non-durable subscriber gone while the message still needed delivery.
    SubscriberClosed,

    /// Non-durable subscriber gone; message was already safe to dispose.
    Disposable,

    /// The dead-letter move itself failed.
    DeadLetterFailed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Stale =>
                write!(f, "stale message discarded"),
            DropReason::TopicNoDeadLetter =>
                write!(f, "topic message discarded after send error"),
            DropReason::SubscriberClosed =>
                write!(f, "subscriber closed"),
            DropReason::Disposable =>
                write!(f, "subscriber closed, message disposable"),
            DropReason::DeadLetterFailed =>
                write!(f, "dead-letter move failed"),
        }
    }
}
