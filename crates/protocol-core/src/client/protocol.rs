use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::client::correlation::{CorrelationTable, DuplicateCommandId};
use crate::client::demux;
use crate::client::subscription::{DuplicateSubscription, SubscriptionTable};
use crate::transport::Transport;
use crate::types::{wire, Command, CommandId, CommandResult, CommandTimeoutError, Event, StreamId};

/// How long [`ClientProtocol::send`] waits for a matching result before
/// giving up. spec.md §9 leaves this configurable-or-not open; fixed here
/// as a constant rather than threading a timeout parameter through every
/// call site.
pub const COMMAND_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SendError<E: std::error::Error + Send + Sync + 'static> {
    #[error("command id already has a result pending: {0}")]
    Duplicate(#[from] DuplicateCommandId),
    #[error("transport error while publishing command: {0}")]
    Transport(#[source] E),
    #[error(transparent)]
    Timeout(#[from] CommandTimeoutError),
}

/// Guards a [`CorrelationTable`] entry for the span between `insert` and
/// resolution. If `send`'s future is dropped before it resolves — the
/// caller's scope was cancelled — this runs on unwind and removes the
/// entry, so a cancelled send never leaks its slot (spec.md §3: every
/// inserted command id is either resolved and removed, or removed by the
/// deadline; §5: "scope cancellation ... immediately removes the pending
/// slot"). `disarm` is called once the slot has actually been resolved
/// (taken by the demultiplexer), so the final `remove` in that case is a
/// no-op performed for every other exit path only.
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    id: Option<CommandId>,
}

impl<'a> PendingGuard<'a> {
    fn new(table: &'a CorrelationTable, id: CommandId) -> Self {
        Self { table, id: Some(id) }
    }

    /// The slot was resolved by the demultiplexer; nothing left to clean up.
    fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.table.remove(&id);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateSubscription),
    #[error("transport error while opening subscription: {0}")]
    Transport(String),
}

/// A live event subscription. Dropping this drops the underlying queue
/// registration, so a consumer that stops polling stops accumulating
/// memory for a stream nobody reads anymore.
pub struct Subscription {
    stream_id: StreamId,
    table: Arc<SubscriptionTable>,
    receiver: UnboundedReceiverStream<Event>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.next().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.table.close(&self.stream_id);
    }
}

/// The client half of the protocol: issues commands and opens
/// subscriptions over a [`Transport`], correlating and demultiplexing
/// inbound frames in a background task owned by this value.
pub struct ClientProtocol<T: Transport> {
    transport: Arc<T>,
    correlation: Arc<CorrelationTable>,
    subscriptions: Arc<SubscriptionTable>,
    demux_handle: JoinHandle<()>,
}

impl<T: Transport> ClientProtocol<T> {
    pub fn new(transport: Arc<T>) -> Self {
        let correlation = Arc::new(CorrelationTable::new());
        let subscriptions = Arc::new(SubscriptionTable::new());

        let demux_handle = tokio::spawn(demux::run(
            Arc::clone(&transport),
            Arc::clone(&correlation),
            Arc::clone(&subscriptions),
        ));

        Self {
            transport,
            correlation,
            subscriptions,
            demux_handle,
        }
    }

    /// Send `command` and wait up to [`COMMAND_DEADLINE`] for its result.
    ///
    /// Cancellation-safe: from `insert` to resolution, the pending slot is
    /// held by a [`PendingGuard`] that removes it on drop. If this future
    /// itself is dropped before resolving — the caller's scope ended — the
    /// guard's `Drop` still runs and the slot never leaks.
    pub async fn send(&self, command: Command) -> Result<CommandResult, SendError<T::Error>> {
        let (tx, rx) = oneshot::channel();
        self.correlation.insert(command.id.clone(), tx)?;
        let guard = PendingGuard::new(self.correlation.as_ref(), command.id.clone());

        let frame = protocol_wire::encode(&protocol_wire::Envelope::Command(wire::command_to_wire(&command)));
        if let Err(err) = self.transport.publish(frame).await {
            return Err(SendError::Transport(err));
        }

        let timeout_error = || {
            SendError::Timeout(CommandTimeoutError {
                command_id: command.id.clone(),
                timeout_ms: COMMAND_DEADLINE.as_millis() as u64,
            })
        };

        let outcome = match tokio::time::timeout(COMMAND_DEADLINE, rx).await {
            Ok(Ok(result)) => Ok(result),
            // Sender dropped without sending: the slot was taken but never
            // resolved (shouldn't happen in practice since only demux::run
            // takes a slot and always sends before dropping it). Treat the
            // same as a timeout.
            Ok(Err(_recv_error)) => Err(timeout_error()),
            Err(_elapsed) => Err(timeout_error()),
        };

        if outcome.is_ok() {
            guard.disarm();
        }
        outcome
    }

    /// Open a subscription to `stream_id`. Fails if this client already has
    /// an open subscription to the same stream.
    pub async fn subscribe(&self, stream_id: StreamId) -> Result<Subscription, SubscribeError> {
        let rx = self.subscriptions.open(stream_id.clone())?;

        let frame = protocol_wire::encode(&protocol_wire::Envelope::Subscribe(protocol_wire::SubscribeEnvelope {
            stream_id: stream_id.as_str().to_owned(),
        }));
        if let Err(err) = self.transport.publish(frame).await {
            self.subscriptions.close(&stream_id);
            return Err(SubscribeError::Transport(err.to_string()));
        }

        Ok(Subscription {
            stream_id,
            table: Arc::clone(&self.subscriptions),
            receiver: UnboundedReceiverStream::new(rx),
        })
    }
}

impl<T: Transport> Drop for ClientProtocol<T> {
    fn drop(&mut self) {
        self.demux_handle.abort();
    }
}
