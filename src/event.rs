use std::sync::Arc;

use crate::subscription::Subscription;
use crate::types::{MessageContent, MessageMetadata};

/// Reusable slot pairing one message with one subscription.
///
/// Slots are recycled by the ring. Whoever finishes with an event must
/// [`clear`](DeliveryEvent::clear) it so no payload survives into the next
/// cycle.
#[derive(Debug, Default)]
pub struct DeliveryEvent {
    subscription: Option<Arc<Subscription>>,
    metadata: Option<Arc<MessageMetadata>>,
    content: Option<MessageContent>,
    error_occurred: bool,
}

impl DeliveryEvent {
    pub fn new(
        subscription: Arc<Subscription>,
        metadata: Arc<MessageMetadata>,
        content: MessageContent,
    ) -> Self {
        Self {
            subscription: Some(subscription),
            metadata: Some(metadata),
            content: Some(content),
            error_occurred: false,
        }
    }

    /// Overwrite the slot with a new pairing.
    pub fn fill(
        &mut self,
        subscription: Arc<Subscription>,
        metadata: Arc<MessageMetadata>,
        content: MessageContent,
        error_occurred: bool,
    ) {
        self.subscription = Some(subscription);
        self.metadata = Some(metadata);
        self.content = Some(content);
        self.error_occurred = error_occurred;
    }

    /// Flag a failure detected before this stage (e.g. while encoding).
    pub fn set_error_occurred(&mut self, error_occurred: bool) {
        self.error_occurred = error_occurred;
    }

    pub fn is_error_occurred(&self) -> bool {
        self.error_occurred
    }

    pub fn subscription(&self) -> Option<&Arc<Subscription>> {
        self.subscription.as_ref()
    }

    pub fn metadata(&self) -> Option<&Arc<MessageMetadata>> {
        self.metadata.as_ref()
    }

    pub fn content(&self) -> Option<&MessageContent> {
        self.content.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.subscription.is_none()
            && self.metadata.is_none()
            && self.content.is_none()
            && !self.error_occurred
    }

    pub fn clear(&mut self) {
        self.subscription = None;
        self.metadata = None;
        self.content = None;
        self.error_occurred = false;
    }

    /// Move the contents out, leaving the slot cleared.
    pub fn take(&mut self) -> DeliveryEvent {
        std::mem::take(self)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Option<Arc<Subscription>>,
        Option<Arc<MessageMetadata>>,
        Option<MessageContent>,
        bool,
    ) {
        (self.subscription, self.metadata, self.content, self.error_occurred)
    }
}
