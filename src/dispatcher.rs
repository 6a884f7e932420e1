use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::DEFAULT_DEAD_LETTER_QUEUE;
use crate::error::{ConfigError, DeliveryReport, PublishError};
use crate::event::DeliveryEvent;
use crate::ring::DeliveryRing;
use crate::worker::{worker_loop, Collaborators, DeliveryEventHandler, DeliveryStats};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of delivery handlers, one per shard ordinal.
    pub handler_count: usize,
    /// Number of reusable event slots.
    pub ring_size: usize,
    /// Name of the queue undeliverable queue messages are moved to.
    /// Overrides the name carried by the collaborators.
    pub dead_letter_queue: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let handler_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            handler_count,
            ring_size: 1_024,
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: DispatcherConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        self.handler_count = self.handler_count.max(1);
        self.ring_size = self.ring_size.max(1);
        self
    }
}

/// Pool of sharded delivery handlers fed from one ordered ring.
///
/// Every published event is announced to every handler in publish order;
/// only the handler owning the event's channel delivers it.
pub struct Dispatcher {
    ring: Arc<DeliveryRing>,
    senders: Vec<mpsc::Sender<u64>>,
    handlers: Vec<Arc<DeliveryEventHandler>>,
    worker_handles: Vec<JoinHandle<()>>,
    next_sequence: Mutex<u64>,
    is_running: AtomicBool,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Must be called from within a tokio runtime.
    pub fn new(config: DispatcherConfig, collaborators: Collaborators) -> Self {
        Self::build(config, collaborators, None)
    }

    /// Like [`Dispatcher::new`], also streaming a report per owned event.
    pub fn with_reports(
        config: DispatcherConfig,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<DeliveryReport>) {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        (Self::build(config, collaborators, Some(report_tx)), report_rx)
    }

    fn build(
        config: DispatcherConfig,
        collaborators: Collaborators,
        report_tx: Option<mpsc::UnboundedSender<DeliveryReport>>,
    ) -> Self {
        let config = config.normalized();
        let collaborators = collaborators.with_dead_letter_queue(config.dead_letter_queue.clone());
        let handler_count = config.handler_count;
        let ring = Arc::new(DeliveryRing::new(config.ring_size, handler_count));

        let mut senders = Vec::with_capacity(handler_count);
        let mut handlers = Vec::with_capacity(handler_count);
        let mut worker_handles = Vec::with_capacity(handler_count);

        for ordinal in 0..handler_count {
            let handler = Arc::new(DeliveryEventHandler::new(
                ordinal,
                handler_count,
                collaborators.clone(),
            ));
            // A handler never has more than one ring's worth of sequences
            // outstanding, so this never fills.
            let (tx, rx) = mpsc::channel(config.ring_size);
            worker_handles.push(tokio::spawn(worker_loop(
                handler.clone(),
                ring.clone(),
                rx,
                report_tx.clone(),
            )));
            senders.push(tx);
            handlers.push(handler);
        }

        debug!(
            handler_count,
            ring_size = config.ring_size,
            dead_letter_queue = %config.dead_letter_queue,
            "delivery dispatcher started"
        );

        Self {
            ring,
            senders,
            handlers,
            worker_handles,
            next_sequence: Mutex::new(0),
            is_running: AtomicBool::new(true),
            config,
        }
    }

    /// Publish one event and return its sequence number.
    ///
    /// Waits if the target slot is still held by a slow handler.
    pub async fn publish(&self, event: DeliveryEvent) -> Result<u64, PublishError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PublishError::Shutdown);
        }

        let mut next = self.next_sequence.lock().await;
        let sequence = *next;
        self.ring.write(sequence, event).await;

        *next += 1;

        for (announced, tx) in self.senders.iter().enumerate() {
            if tx.send(sequence).await.is_err() {
                // Handlers that never heard of this sequence will not release it.
                let unannounced = self.senders.len() - announced;
                self.ring.abandon(sequence, unannounced);
                self.is_running.store(false, Ordering::SeqCst);
                warn!(sequence, unannounced, "delivery handler gone, dispatcher stopped");
                return Err(PublishError::Shutdown);
            }
        }
        Ok(sequence)
    }

    /// Stop accepting events, let handlers drain, and join them.
    pub async fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.senders.clear();

        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
        debug!("delivery dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn ring(&self) -> &DeliveryRing {
        &self.ring
    }

    pub fn handler_stats(&self) -> Vec<DeliveryStats> {
        self.handlers.iter().map(|h| h.stats()).collect()
    }

    /// Stats summed across all handlers.
    pub fn stats(&self) -> DeliveryStats {
        self.handlers
            .iter()
            .map(|h| h.stats())
            .fold(DeliveryStats::default(), DeliveryStats::merge)
    }
}
