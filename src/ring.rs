use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::event::DeliveryEvent;
use crate::types::lock;

struct Slot {
    event: Mutex<DeliveryEvent>,
    /// Handlers that have not yet released the current cycle.
    pending: AtomicUsize,
}

/// Fixed ring of reusable delivery slots, addressed by sequence.
///
/// Slot `sequence % capacity` is written by the single producer, read by
/// every handler, and taken by exactly one of them. The producer waits
/// until all handlers have released a slot before overwriting it.
pub struct DeliveryRing {
    slots: Box<[Slot]>,
    readers: usize,
    released: Notify,
}

impl DeliveryRing {
    pub fn new(capacity: usize, readers: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| Slot {
                event: Mutex::new(DeliveryEvent::default()),
                pending: AtomicUsize::new(0),
            })
            .collect();
        Self {
            slots,
            readers: readers.max(1),
            released: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, sequence: u64) -> &Slot {
        &self.slots[(sequence % self.slots.len() as u64) as usize]
    }

    /// Write `event` into the slot for `sequence`, waiting for the previous
    /// cycle of that slot to be released by every handler.
    pub async fn write(&self, sequence: u64, event: DeliveryEvent) {
        let slot = self.slot(sequence);
        loop {
            let released = self.released.notified();
            if slot.pending.load(Ordering::Acquire) == 0 {
                break;
            }
            released.await;
        }

        *lock(&slot.event) = event;
        slot.pending.store(self.readers, Ordering::Release);
    }

    /// Take the slot's contents if `owns` accepts them; otherwise return an
    /// empty event and leave the slot alone.
    pub fn claim_if<F>(&self, sequence: u64, owns: F) -> DeliveryEvent
    where
        F: FnOnce(&DeliveryEvent) -> bool,
    {
        let mut guard = lock(&self.slot(sequence).event);
        if owns(&guard) {
            guard.take()
        } else {
            DeliveryEvent::default()
        }
    }

    /// Mark one handler as done with the slot for `sequence`.
    pub fn release(&self, sequence: u64) {
        let slot = self.slot(sequence);
        if slot.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.released.notify_waiters();
        }
    }

    /// Release the slot on behalf of `readers` handlers that will never see
    /// `sequence`. Once no handler holds the slot its event is dropped.
    pub fn abandon(&self, sequence: u64, readers: usize) {
        if readers == 0 {
            return;
        }
        let slot = self.slot(sequence);
        if slot.pending.fetch_sub(readers, Ordering::AcqRel) == readers {
            lock(&slot.event).clear();
            self.released.notify_waiters();
        }
    }

    pub fn is_slot_empty(&self, sequence: u64) -> bool {
        lock(&self.slot(sequence).event).is_empty()
    }
}
