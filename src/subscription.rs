use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::SendFailure;
use crate::types::{lock, ChannelId, MessageContent, MessageId, MessageMetadata};

/// Protocol-side send for one subscriber channel.
///
/// Implementations may block for a bounded time and must not retry
/// internally; the dispatcher decides what happens after a failure.
#[async_trait]
pub trait SubscriberTransport: Send + Sync {
    async fn send(
        &self,
        message: &MessageMetadata,
        content: &MessageContent,
    ) -> Result<(), SendFailure>;
}

/// One subscriber's live channel.
///
/// Created and destroyed by subscription management. The dispatcher only
/// reads the flags, calls [`Subscription::send`], and trims the sent
/// tracker on failure.
pub struct Subscription {
    channel_id: ChannelId,
    active: AtomicBool,
    durable: bool,
    sent: Mutex<HashSet<MessageId>>,
    transport: Arc<dyn SubscriberTransport>,
}

impl Subscription {
    pub fn new(channel_id: ChannelId, transport: Arc<dyn SubscriberTransport>) -> Self {
        Self {
            channel_id,
            active: AtomicBool::new(true),
            durable: false,
            sent: Mutex::new(HashSet::new()),
            transport,
        }
    }

    /// Durable subscriptions have failed messages requeued instead of dropped.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Record a message as sent but not yet acknowledged.
    pub fn track_sent(&self, message_id: MessageId) {
        lock(&self.sent).insert(message_id);
    }

    pub fn is_tracking(&self, message_id: MessageId) -> bool {
        lock(&self.sent).contains(&message_id)
    }

    pub fn unacked_count(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn remove_sent_message(&self, message_id: MessageId) {
        lock(&self.sent).remove(&message_id);
    }

    pub async fn send(
        &self,
        message: &MessageMetadata,
        content: &MessageContent,
    ) -> Result<(), SendFailure> {
        self.transport.send(message, content).await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel_id", &self.channel_id)
            .field("active", &self.is_active())
            .field("durable", &self.durable)
            .field("unacked", &self.unacked_count())
            .finish()
    }
}
