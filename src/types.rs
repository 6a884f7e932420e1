use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a subscriber's live delivery channel.
///
/// Shard ownership is derived from [`ChannelId::hash_code`], so the same
/// channel always lands on the same dispatcher for a fixed shard count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u64_pair(high: u64, low: u64) -> Self {
        Self(Uuid::from_u64_pair(high, low))
    }

    /// Signed 32-bit fold of the 128-bit identity.
    pub fn hash_code(&self) -> i32 {
        let (hi, lo) = self.0.as_u64_pair();
        let hilo = hi ^ lo;
        ((hilo >> 32) as i32) ^ (hilo as i32)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Broker-wide message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Queue,
    Topic,
}

/// Opaque message body handed to the subscriber's transport.
///
/// The dispatcher never inspects the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent(Arc<[u8]>);

impl Default for MessageContent {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MessageContent {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self(Arc::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Delivery-side view of one message.
///
/// Lives as long as the message is unacknowledged somewhere in the broker.
/// The scheduled-channel set and failure counts are only mutated by the
/// dispatcher that owns the channel in question.
#[derive(Debug)]
pub struct MessageMetadata {
    id: MessageId,
    destination: String,
    kind: MessageKind,
    stale: AtomicBool,
    ok_to_dispose: AtomicBool,
    scheduled: Mutex<HashSet<ChannelId>>,
    failures: Mutex<HashMap<ChannelId, u32>>,
}

impl MessageMetadata {
    pub fn new(id: MessageId, destination: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id,
            destination: destination.into(),
            kind,
            stale: AtomicBool::new(false),
            ok_to_dispose: AtomicBool::new(false),
            scheduled: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Metadata for a message published to a queue.
    pub fn queue(id: u64, destination: impl Into<String>) -> Self {
        Self::new(MessageId(id), destination, MessageKind::Queue)
    }

    /// Metadata for a message published to a topic.
    pub fn topic(id: u64, destination: impl Into<String>) -> Self {
        Self::new(MessageId(id), destination, MessageKind::Topic)
    }

    pub fn with_stale(self, stale: bool) -> Self {
        self.stale.store(stale, Ordering::SeqCst);
        self
    }

    pub fn with_ok_to_dispose(self, ok: bool) -> Self {
        self.ok_to_dispose.store(ok, Ordering::SeqCst);
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_topic(&self) -> bool {
        self.kind == MessageKind::Topic
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// True once every interested party has acknowledged the message.
    pub fn is_ok_to_dispose(&self) -> bool {
        self.ok_to_dispose.load(Ordering::SeqCst)
    }

    pub fn set_ok_to_dispose(&self, ok: bool) {
        self.ok_to_dispose.store(ok, Ordering::SeqCst);
    }

    /// Record that a send to `channel` is in flight.
    pub fn schedule_delivery(&self, channel: ChannelId) {
        lock(&self.scheduled).insert(channel);
    }

    pub fn is_scheduled_for(&self, channel: &ChannelId) -> bool {
        lock(&self.scheduled).contains(channel)
    }

    pub fn scheduled_channels(&self) -> Vec<ChannelId> {
        lock(&self.scheduled).iter().copied().collect()
    }

    pub fn remove_scheduled_channel(&self, channel: &ChannelId) {
        lock(&self.scheduled).remove(channel);
    }

    /// Note that a delivery attempt on `channel` did not reach the subscriber.
    pub fn mark_delivery_failure(&self, channel: ChannelId) {
        *lock(&self.failures).entry(channel).or_insert(0) += 1;
    }

    pub fn delivery_failures(&self, channel: &ChannelId) -> u32 {
        lock(&self.failures).get(channel).copied().unwrap_or(0)
    }
}

/// Dead-letter queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub message_id: MessageId,
    pub destination: String,
    pub dead_letter_queue: String,
    pub moved_at_secs: u64,
}

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
