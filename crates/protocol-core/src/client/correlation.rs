use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::types::{CommandId, CommandResult};

/// Raised by [`CorrelationTable::insert`] when a command id is already
/// pending. spec.md §9 leaves duplicate ids unspecified; this crate rejects
/// them rather than silently abandoning the first waiter.
#[derive(Debug, Clone, thiserror::Error)]
#[error("duplicate command id: {0}")]
pub struct DuplicateCommandId(pub CommandId);

/// Client-side map from command id to the one-shot slot awaiting its
/// result. The only shared mutable state on the send path; every method
/// here is a single lock-protected operation, never held across an
/// `.await`.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<CommandId, oneshot::Sender<CommandResult>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh slot for `id`. Fails if `id` is already pending.
    pub fn insert(
        &self,
        id: CommandId,
        slot: oneshot::Sender<CommandResult>,
    ) -> Result<(), DuplicateCommandId> {
        let mut pending = self.pending.lock().expect("correlation table poisoned");
        if pending.contains_key(&id) {
            return Err(DuplicateCommandId(id));
        }
        pending.insert(id, slot);
        Ok(())
    }

    /// Atomically remove and return the slot for `id`, if present.
    pub fn take(&self, id: &CommandId) -> Option<oneshot::Sender<CommandResult>> {
        self.pending.lock().expect("correlation table poisoned").remove(id)
    }

    /// Idempotent removal, used by the deadline/cancellation paths once the
    /// slot's fate is decided without a matching inbound frame.
    pub fn remove(&self, id: &CommandId) {
        self.pending.lock().expect("correlation table poisoned").remove(id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().expect("correlation table poisoned").len()
    }
}
