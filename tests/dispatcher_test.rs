mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{content, mark_in_flight, subscription, Harness, Script, ScriptedTransport};
use delivery_dispatcher::{
    DeliveryEvent, DeliveryOutcome, DeliveryReport, DeliveryRing, Dispatcher, DispatcherConfig,
    MessageId, MessageMetadata, PublishError,
};
use tokio::sync::mpsc::UnboundedReceiver;

async fn collect_reports(rx: &mut UnboundedReceiver<DeliveryReport>, n: usize) -> Vec<DeliveryReport> {
    let mut reports = Vec::with_capacity(n);
    while reports.len() < n {
        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for delivery reports")
            .expect("report channel closed");
        reports.push(report);
    }
    reports
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_channel_isolation_and_ordering() {
    let harness = Harness::new();
    let config = DispatcherConfig {
        handler_count: 4,
        ring_size: 8,
        ..Default::default()
    };
    let (dispatcher, mut reports) = Dispatcher::with_reports(config, harness.collaborators());

    let transports: Vec<_> = (0..6).map(|_| ScriptedTransport::new(Script::Deliver)).collect();
    let subs: Vec<_> = transports
        .iter()
        .map(|t| subscription(t.clone(), false, true))
        .collect();

    let mut expected: HashMap<usize, Vec<MessageId>> = HashMap::new();
    for id in 0..60u64 {
        let index = (id as usize * 7) % subs.len();
        let message = Arc::new(MessageMetadata::queue(id, "orders"));
        mark_in_flight(&message, &subs[index]);
        expected.entry(index).or_default().push(message.id());

        let event = DeliveryEvent::new(subs[index].clone(), message, content());
        dispatcher.publish(event).await.unwrap();
    }

    let reports = collect_reports(&mut reports, 60).await;
    assert!(reports.iter().all(|r| r.outcome == DeliveryOutcome::Delivered));

    for (index, transport) in transports.iter().enumerate() {
        assert_eq!(transport.seen(), expected[&index], "per-channel order for {index}");
    }

    let stats = dispatcher.stats();
    assert_eq!(stats.owned, 60);
    assert_eq!(stats.delivered, 60);
    // Every handler is shown every event.
    for handler in dispatcher.handler_stats() {
        assert_eq!(handler.seen, 60);
    }

    for sequence in 0..dispatcher.ring().capacity() as u64 {
        assert!(dispatcher.ring().is_slot_empty(sequence));
    }

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_small_ring_applies_backpressure_without_losing_events() {
    let harness = Harness::new();
    let config = DispatcherConfig {
        handler_count: 3,
        ring_size: 2,
        ..Default::default()
    };
    let (mut dispatcher, mut reports) = Dispatcher::with_reports(config, harness.collaborators());

    let transport = ScriptedTransport::new(Script::Deliver);
    let sub = subscription(transport.clone(), false, true);
    for id in 0..25u64 {
        let message = Arc::new(MessageMetadata::queue(id, "orders"));
        let sequence = dispatcher
            .publish(DeliveryEvent::new(sub.clone(), message, content()))
            .await
            .unwrap();
        assert_eq!(sequence, id);
    }

    collect_reports(&mut reports, 25).await;
    assert_eq!(transport.calls(), 25);

    dispatcher.shutdown().await;
    assert!(!dispatcher.is_running());
}

#[tokio::test]
async fn test_failures_are_recovered_inside_the_pool() {
    let harness = Harness::new();
    let config = DispatcherConfig {
        handler_count: 2,
        ring_size: 16,
        ..Default::default()
    };
    let (mut dispatcher, mut reports) = Dispatcher::with_reports(config, harness.collaborators());

    let broken = subscription(ScriptedTransport::new(Script::Panic), false, true);
    let closed_durable = subscription(ScriptedTransport::new(Script::Deliver), true, false);
    let rejecting = subscription(ScriptedTransport::new(Script::RuleViolation), false, true);
    let healthy_transport = ScriptedTransport::new(Script::Deliver);
    let healthy = subscription(healthy_transport.clone(), false, true);

    let pairs = [
        (broken, MessageMetadata::queue(1, "orders")),
        (closed_durable, MessageMetadata::queue(2, "orders")),
        (rejecting, MessageMetadata::queue(3, "orders")),
        (healthy, MessageMetadata::queue(4, "orders")),
    ];
    for (sub, message) in pairs {
        let message = Arc::new(message);
        mark_in_flight(&message, &sub);
        dispatcher
            .publish(DeliveryEvent::new(sub, message, content()))
            .await
            .unwrap();
    }

    let reports = collect_reports(&mut reports, 4).await;
    let outcome_of = |id: u64| {
        reports
            .iter()
            .find(|r| r.message_id == MessageId(id))
            .map(|r| r.outcome.clone())
            .unwrap()
    };
    assert_eq!(outcome_of(1), DeliveryOutcome::Unhandled);
    assert_eq!(outcome_of(2), DeliveryOutcome::Requeued);
    assert_eq!(outcome_of(3), DeliveryOutcome::DeadLettered);
    assert_eq!(outcome_of(4), DeliveryOutcome::Delivered);
    assert_eq!(healthy_transport.calls(), 1);

    assert_eq!(harness.engine.requeued_ids().await, vec![MessageId(2)]);
    assert_eq!(harness.engine.dead_letter_snapshot().await.len(), 1);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_publish_after_shutdown_is_rejected() {
    let harness = Harness::new();
    let config = DispatcherConfig {
        handler_count: 2,
        ring_size: 4,
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(config, harness.collaborators());
    dispatcher.shutdown().await;

    let sub = subscription(ScriptedTransport::new(Script::Deliver), false, true);
    let message = Arc::new(MessageMetadata::queue(1, "orders"));
    let result = dispatcher
        .publish(DeliveryEvent::new(sub, message, content()))
        .await;
    assert_eq!(result, Err(PublishError::Shutdown));
}

#[tokio::test]
async fn test_configured_dead_letter_queue_is_used_for_moves() {
    let harness = Harness::new();
    let config = DispatcherConfig::from_json(
        r#"{"handler_count": 1, "ring_size": 4, "dead_letter_queue": "MyDLQ"}"#,
    )
    .unwrap();
    let (mut dispatcher, mut reports) = Dispatcher::with_reports(config, harness.collaborators());

    let sub = subscription(ScriptedTransport::new(Script::RuleViolation), false, true);
    let message = Arc::new(MessageMetadata::queue(1, "orders"));
    mark_in_flight(&message, &sub);
    dispatcher
        .publish(DeliveryEvent::new(sub, message, content()))
        .await
        .unwrap();

    let reports = collect_reports(&mut reports, 1).await;
    assert_eq!(reports[0].outcome, DeliveryOutcome::DeadLettered);

    let dead = harness.engine.dead_letter_snapshot().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].destination, "orders");
    assert_eq!(dead[0].dead_letter_queue, "MyDLQ");

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_abandoned_slot_can_be_rewritten() {
    let ring = DeliveryRing::new(2, 3);
    let sub = subscription(ScriptedTransport::new(Script::Deliver), false, true);
    let event = |id: u64| {
        DeliveryEvent::new(sub.clone(), Arc::new(MessageMetadata::queue(id, "orders")), content())
    };

    ring.write(0, event(1)).await;
    // One handler saw the sequence; the other two were never told about it.
    ring.release(0);
    assert!(!ring.is_slot_empty(0));
    ring.abandon(0, 2);
    assert!(ring.is_slot_empty(0));

    tokio::time::timeout(Duration::from_secs(1), ring.write(2, event(2)))
        .await
        .expect("slot was not released by abandon");
    assert!(!ring.is_slot_empty(2));
}

#[tokio::test]
async fn test_abandon_before_late_release_keeps_slot_until_released() {
    let ring = DeliveryRing::new(1, 2);
    let sub = subscription(ScriptedTransport::new(Script::Deliver), false, true);
    let message = Arc::new(MessageMetadata::queue(1, "orders"));

    ring.write(0, DeliveryEvent::new(sub.clone(), message.clone(), content())).await;
    ring.abandon(0, 1);
    assert!(!ring.is_slot_empty(0));

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        ring.write(1, DeliveryEvent::new(sub.clone(), message.clone(), content())),
    )
    .await;
    assert!(blocked.is_err());

    ring.release(0);
    tokio::time::timeout(
        Duration::from_secs(1),
        ring.write(1, DeliveryEvent::new(sub, message, content())),
    )
    .await
    .expect("slot was not released");
}

#[test]
fn test_config_from_json() {
    let config = DispatcherConfig::from_json(r#"{"handler_count": 0, "ring_size": 64}"#).unwrap();
    assert_eq!(config.handler_count, 1);
    assert_eq!(config.ring_size, 64);
    assert_eq!(config.dead_letter_queue, "DeadLetterChannel");

    let config = DispatcherConfig::from_json(r#"{"dead_letter_queue": "DLQ"}"#).unwrap();
    assert_eq!(config.dead_letter_queue, "DLQ");
    assert!(config.handler_count >= 1);

    assert!(DispatcherConfig::from_json("{ not json").is_err());
}
