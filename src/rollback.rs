use crate::subscription::Subscription;
use crate::types::MessageMetadata;

/// Revert the in-flight bookkeeping recorded before a send.
///
/// Must run once per failed attempt and before any requeue or dead-letter
/// move, since both assume the message is no longer in flight on this
/// channel.
pub fn on_send_error(message: &MessageMetadata, subscription: &Subscription) {
    let channel = subscription.channel_id();
    message.mark_delivery_failure(channel);
    message.remove_scheduled_channel(&channel);
    subscription.remove_sent_message(message.id());
}
