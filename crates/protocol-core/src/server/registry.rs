use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;

use crate::types::StreamId;

/// Server-side map from stream id to the set of connections currently
/// subscribed to it. Backs event fan-out: `publish_event` looks up
/// `subscribers_of` and sends to each one individually rather than
/// broadcasting to every connected peer.
pub struct SubscriptionRegistry<C> {
    subscribers: Mutex<HashMap<StreamId, HashSet<C>>>,
}

impl<C: Clone + Eq + Hash> Default for SubscriptionRegistry<C> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }
}

impl<C: Clone + Eq + Hash> SubscriptionRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `connection` wants events from `stream_id`. Idempotent:
    /// subscribing twice to the same stream from the same connection has
    /// no additional effect.
    pub fn subscribe(&self, stream_id: StreamId, connection: C) {
        self.subscribers
            .lock()
            .expect("subscription registry poisoned")
            .entry(stream_id)
            .or_default()
            .insert(connection);
    }

    /// Remove every subscription held by `connection`, called when the
    /// connection disconnects.
    pub fn unsubscribe_all(&self, connection: &C) {
        let mut subscribers = self.subscribers.lock().expect("subscription registry poisoned");
        subscribers.retain(|_stream_id, connections| {
            connections.remove(connection);
            !connections.is_empty()
        });
    }

    /// The connections currently subscribed to `stream_id`, or an empty
    /// vector if none are.
    pub fn subscribers_of(&self, stream_id: &StreamId) -> Vec<C> {
        self.subscribers
            .lock()
            .expect("subscription registry poisoned")
            .get(stream_id)
            .map(|connections| connections.iter().cloned().collect())
            .unwrap_or_default()
    }
}
