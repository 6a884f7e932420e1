use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{now_secs, DeadLetterEntry, MessageId, MessageMetadata};

pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "DeadLetterChannel";

/// Hands a message back to the broker so another subscriber can take it.
///
/// Fire-and-forget from the dispatcher's side; durability of the requeue
/// is the broker's concern.
#[async_trait]
pub trait RequeueService: Send + Sync {
    async fn requeue(&self, message: Arc<MessageMetadata>);
}

/// Moves undeliverable queue messages out of their destination.
///
/// The caller names the dead-letter queue; the service only performs the move.
#[async_trait]
pub trait DeadLetterService: Send + Sync {
    async fn move_to_dead_letter(
        &self,
        message: &MessageMetadata,
        destination: &str,
        dead_letter_queue: &str,
    ) -> Result<(), StoreError>;
}

/// In-memory broker engine for embedded use and tests.
///
/// Records requeued messages and dead-letter entries. Dead-letter moves can
/// be made to fail to exercise the potential-loss path.
pub struct InMemoryEngine {
    requeued: Mutex<Vec<Arc<MessageMetadata>>>,
    dead_letters: Mutex<Vec<DeadLetterEntry>>,
    fail_dead_letter: AtomicBool,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            requeued: Mutex::new(Vec::new()),
            dead_letters: Mutex::new(Vec::new()),
            fail_dead_letter: AtomicBool::new(false),
        }
    }

    /// Make every subsequent dead-letter move fail (or succeed again).
    pub fn set_fail_dead_letter(&self, fail: bool) {
        self.fail_dead_letter.store(fail, Ordering::SeqCst);
    }

    pub async fn requeued_ids(&self) -> Vec<MessageId> {
        self.requeued.lock().await.iter().map(|m| m.id()).collect()
    }

    /// Drain requeued messages so the caller can redistribute them.
    pub async fn take_requeued(&self) -> Vec<Arc<MessageMetadata>> {
        std::mem::take(&mut *self.requeued.lock().await)
    }

    pub async fn dead_letter_snapshot(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.lock().await.clone()
    }

    pub async fn dead_letters_for_destination(&self, destination: &str) -> Vec<DeadLetterEntry> {
        self.dead_letters
            .lock()
            .await
            .iter()
            .filter(|entry| entry.destination == destination)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RequeueService for InMemoryEngine {
    async fn requeue(&self, message: Arc<MessageMetadata>) {
        self.requeued.lock().await.push(message);
    }
}

#[async_trait]
impl DeadLetterService for InMemoryEngine {
    async fn move_to_dead_letter(
        &self,
        message: &MessageMetadata,
        destination: &str,
        dead_letter_queue: &str,
    ) -> Result<(), StoreError> {
        if self.fail_dead_letter.load(Ordering::SeqCst) {
            return Err(StoreError::DeadLetterMove {
                message_id: message.id(),
                dead_letter_queue: dead_letter_queue.to_string(),
                reason: "store rejected move".to_string(),
            });
        }

        self.dead_letters.lock().await.push(DeadLetterEntry {
            message_id: message.id(),
            destination: destination.to_string(),
            dead_letter_queue: dead_letter_queue.to_string(),
            moved_at_secs: now_secs(),
        });
        Ok(())
    }
}
