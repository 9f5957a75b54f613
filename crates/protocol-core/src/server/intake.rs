use std::sync::Arc;

use futures_util::stream::select;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::server::registry::SubscriptionRegistry;
use crate::transport::{ConnectionEvent, Transport};
use crate::types::{Command, CommandId, StreamId};

/// Lazy sequence of commands arriving from any connection, paired with
/// which connection each one came from so the application can address its
/// eventual [`crate::server::ServerProtocol::send_result`] back to the
/// right peer.
pub struct CommandStream<C> {
    receiver: UnboundedReceiverStream<(C, Command)>,
}

impl<C> CommandStream<C> {
    pub async fn next(&mut self) -> Option<(C, Command)> {
        self.receiver.next().await
    }
}

enum InboundItem<C> {
    Frame(C, String),
    Connection(ConnectionEvent<C>),
}

/// Reads every inbound frame and connection event for the lifetime of a
/// [`crate::server::ServerProtocol`]:
/// - `subscribe` envelopes register into `registry` directly, the
///   application never sees them.
/// - `command` envelopes are forwarded to `commands` for the application
///   to act on.
/// - disconnects clear the registry so a gone connection never receives a
///   `publish_event` call again.
pub(crate) async fn run<T: Transport>(
    transport: Arc<T>,
    registry: Arc<SubscriptionRegistry<T::ConnectionId>>,
    commands: mpsc::UnboundedSender<(T::ConnectionId, Command)>,
) {
    let frames = transport.inbound().map(|(connection, frame)| InboundItem::Frame(connection, frame));
    let connections = transport.connection_events().map(InboundItem::Connection);
    let mut items = select(frames, connections);

    while let Some(item) = items.next().await {
        match item {
            InboundItem::Frame(connection, frame) => {
                let envelope = match protocol_wire::decode(&frame) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::warn!(error = %err, "discarding unparseable inbound frame");
                        continue;
                    }
                };

                match envelope {
                    protocol_wire::Envelope::Subscribe(subscribe) => {
                        registry.subscribe(StreamId::from(subscribe.stream_id), connection);
                    }
                    protocol_wire::Envelope::Command(command) => {
                        let command = Command {
                            id: CommandId::from(command.id),
                            target: StreamId::from(command.target),
                            name: command.name,
                            payload: command.payload,
                        };
                        if commands.send((connection, command)).is_err() {
                            // Application dropped its CommandStream; nothing left to do.
                            return;
                        }
                    }
                    protocol_wire::Envelope::CommandResult(_) | protocol_wire::Envelope::Event(_) => {
                        tracing::warn!("server received a client-bound envelope, ignoring");
                    }
                }
            }
            InboundItem::Connection(ConnectionEvent::Disconnected(connection)) => {
                registry.unsubscribe_all(&connection);
            }
            InboundItem::Connection(ConnectionEvent::Connected(_)) => {}
        }
    }
}

pub(crate) fn channel<C>() -> (
    mpsc::UnboundedSender<(C, Command)>,
    CommandStream<C>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, CommandStream { receiver: UnboundedReceiverStream::new(rx) })
}
