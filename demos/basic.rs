use std::sync::Arc;

use async_trait::async_trait;
use delivery_dispatcher::{
    ChannelId, Collaborators, DeliveryEvent, Dispatcher, DispatcherConfig, InMemoryEngine,
    MessageContent, MessageMetadata, PublishError, SendFailure, SubscriberTransport, Subscription,
};

struct PrintTransport;

#[async_trait]
impl SubscriberTransport for PrintTransport {
    async fn send(
        &self,
        message: &MessageMetadata,
        content: &MessageContent,
    ) -> Result<(), SendFailure> {
        println!("delivered {} ({} bytes)", message.id(), content.len());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), PublishError> {
    let config = DispatcherConfig {
        handler_count: 4,
        dead_letter_queue: "orders.dlq".to_string(),
        ..Default::default()
    };
    let engine = Arc::new(InMemoryEngine::new());
    let mut dispatcher = Dispatcher::new(config, Collaborators::from_engine(engine.clone()));

    let live = Arc::new(Subscription::new(ChannelId::new_v4(), Arc::new(PrintTransport)));
    let closed = Arc::new(
        Subscription::new(ChannelId::new_v4(), Arc::new(PrintTransport)).with_durable(true),
    );
    closed.deactivate();

    for (id, sub) in [(1, &live), (2, &closed), (3, &live)] {
        let message = Arc::new(MessageMetadata::queue(id, "orders"));
        let event = DeliveryEvent::new(sub.clone(), message, MessageContent::new(r#"{"id":1}"#));
        dispatcher.publish(event).await?;
    }

    dispatcher.shutdown().await;
    println!("requeued: {:?}", engine.requeued_ids().await);
    println!("stats: {:?}", dispatcher.stats());
    Ok(())
}
