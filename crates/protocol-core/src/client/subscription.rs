use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::types::{Event, StreamId};

/// Raised by [`SubscriptionTable::open`] when a stream id already has an
/// active subscription on this protocol instance. spec.md §9 leaves
/// double-subscribe unspecified; this crate rejects it for the same reason
/// duplicate command ids are rejected (the table-insert pattern would
/// otherwise silently overwrite and orphan the first consumer).
#[derive(Debug, Clone, thiserror::Error)]
#[error("stream already subscribed: {0}")]
pub struct DuplicateSubscription(pub StreamId);

/// Client-side map from stream id to the unbounded queue feeding that
/// stream's lazy sequence.
#[derive(Default)]
pub struct SubscriptionTable {
    queues: Mutex<HashMap<StreamId, mpsc::UnboundedSender<Event>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh queue for `stream_id`, returning the receiver half
    /// the caller's lazy sequence is built on.
    pub fn open(
        &self,
        stream_id: StreamId,
    ) -> Result<mpsc::UnboundedReceiver<Event>, DuplicateSubscription> {
        let mut queues = self.queues.lock().expect("subscription table poisoned");
        if queues.contains_key(&stream_id) {
            return Err(DuplicateSubscription(stream_id));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(stream_id, tx);
        Ok(rx)
    }

    /// Look up the queue for `stream_id`, cloning the sender half so the
    /// demultiplexer can enqueue without holding the table lock.
    pub fn get(&self, stream_id: &StreamId) -> Option<mpsc::UnboundedSender<Event>> {
        self.queues.lock().expect("subscription table poisoned").get(stream_id).cloned()
    }

    /// Unregister `stream_id`. Idempotent; dropping the paired receiver is
    /// what actually signals end-of-sequence to the consumer.
    pub fn close(&self, stream_id: &StreamId) {
        self.queues.lock().expect("subscription table poisoned").remove(stream_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queues.lock().expect("subscription table poisoned").len()
    }
}
