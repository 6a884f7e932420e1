#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use delivery_dispatcher::{
    ChannelId, Collaborators, DeliveryEventHandler, InMemoryEngine, MessageContent, MessageId,
    MessageMetadata, MessageTracer, MetricsSink, SendFailure, SubscriberTransport, Subscription,
    TraceKind,
};

/// What a scripted transport does on every send.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Deliver,
    RuleViolation,
    Transient,
    Unexpected,
    Panic,
}

pub struct ScriptedTransport {
    script: Script,
    calls: AtomicUsize,
    seen: Mutex<Vec<MessageId>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<MessageId> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubscriberTransport for ScriptedTransport {
    async fn send(
        &self,
        message: &MessageMetadata,
        _content: &MessageContent,
    ) -> Result<(), SendFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(message.id());
        match self.script {
            Script::Deliver => Ok(()),
            Script::RuleViolation => Err(SendFailure::RuleViolation("frame too large".into())),
            Script::Transient => Err(SendFailure::Transient("connection reset".into())),
            Script::Unexpected => Err(SendFailure::Unexpected("codec state corrupted".into())),
            Script::Panic => panic!("transport exploded"),
        }
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    names: Mutex<Vec<&'static str>>,
}

impl RecordingMetrics {
    pub fn count(&self, name: &str) -> usize {
        self.names.lock().unwrap().iter().filter(|n| **n == name).count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment(&self, name: &'static str) {
        self.names.lock().unwrap().push(name);
    }
}

#[derive(Default)]
pub struct RecordingTracer {
    events: Mutex<Vec<(TraceKind, MessageId)>>,
}

impl RecordingTracer {
    pub fn events(&self) -> Vec<(TraceKind, MessageId)> {
        self.events.lock().unwrap().clone()
    }
}

impl MessageTracer for RecordingTracer {
    fn trace(&self, kind: TraceKind, message: &MessageMetadata) {
        self.events.lock().unwrap().push((kind, message.id()));
    }
}

pub struct Harness {
    pub engine: Arc<InMemoryEngine>,
    pub metrics: Arc<RecordingMetrics>,
    pub tracer: Arc<RecordingTracer>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(InMemoryEngine::new()),
            metrics: Arc::new(RecordingMetrics::default()),
            tracer: Arc::new(RecordingTracer::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::from_engine(self.engine.clone())
            .with_metrics(self.metrics.clone())
            .with_tracer(self.tracer.clone())
    }

    /// A handler that owns every channel.
    pub fn single_handler(&self) -> DeliveryEventHandler {
        DeliveryEventHandler::new(0, 1, self.collaborators())
    }
}

pub fn subscription(
    transport: Arc<ScriptedTransport>,
    durable: bool,
    active: bool,
) -> Arc<Subscription> {
    let sub = Subscription::new(ChannelId::new_v4(), transport).with_durable(durable);
    if !active {
        sub.deactivate();
    }
    Arc::new(sub)
}

/// Put the message in the state the scheduler leaves it in before a send.
pub fn mark_in_flight(message: &MessageMetadata, subscription: &Subscription) {
    message.schedule_delivery(subscription.channel_id());
    subscription.track_sent(message.id());
}

pub fn content() -> MessageContent {
    MessageContent::new(br#"{"order":42}"#.to_vec())
}
