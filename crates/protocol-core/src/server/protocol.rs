use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::intake::{self, CommandStream};
use crate::server::registry::SubscriptionRegistry;
use crate::transport::Transport;
use crate::types::{wire, CommandId, CommandResult, Event, StreamId};

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError<E: std::error::Error + Send + Sync + 'static>(#[source] pub E);

/// The server half of the protocol: accepts commands from any connection,
/// reports their results back to whichever connection sent them, and
/// publishes events to every connection subscribed to the relevant stream.
///
/// Owns a background task (mirroring [`crate::client::ClientProtocol`])
/// that demultiplexes inbound frames into subscription registrations and
/// application-visible commands, and that retires a connection's
/// subscriptions when it disconnects.
pub struct ServerProtocol<T: Transport> {
    transport: Arc<T>,
    registry: Arc<SubscriptionRegistry<T::ConnectionId>>,
    intake_handle: JoinHandle<()>,
}

impl<T: Transport> ServerProtocol<T> {
    pub fn new(transport: Arc<T>) -> (Self, CommandStream<T::ConnectionId>) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (commands_tx, commands_rx) = intake::channel();

        let intake_handle = tokio::spawn(intake::run(
            Arc::clone(&transport),
            Arc::clone(&registry),
            commands_tx,
        ));

        (
            Self {
                transport,
                registry,
                intake_handle,
            },
            commands_rx,
        )
    }

    /// Report the outcome of `command_id` back to `connection`.
    pub async fn send_result(
        &self,
        connection: T::ConnectionId,
        command_id: &CommandId,
        result: &CommandResult,
    ) -> Result<(), TransportError<T::Error>> {
        let frame = protocol_wire::encode(&protocol_wire::Envelope::CommandResult(wire::result_to_wire(
            command_id, result,
        )));
        self.transport.send_to(connection, frame).await.map_err(TransportError)
    }

    /// Publish `event` to every connection currently subscribed to
    /// `stream_id`. Connections with no subscription never see it; this is
    /// addressed delivery, not a broadcast. A `send_to` failure on one
    /// subscriber is logged and never stops delivery to the rest — one dead
    /// outbound connection must not block fan-out to the others (spec.md
    /// §5's failure-isolation invariant, extended to outbound delivery).
    pub async fn publish_event(&self, stream_id: &StreamId, event: &Event) {
        let frame = protocol_wire::encode(&protocol_wire::Envelope::Event(wire::event_to_wire(stream_id, event)));
        for connection in self.registry.subscribers_of(stream_id) {
            if let Err(err) = self.transport.send_to(connection, frame.clone()).await {
                tracing::warn!(stream_id = %stream_id, error = %err, "failed to deliver event to one subscriber");
            }
        }
    }
}

impl<T: Transport> Drop for ServerProtocol<T> {
    fn drop(&mut self) {
        self.intake_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;
    use futures_util::StreamExt;
    use protocol_wire::{CommandEnvelope, Envelope, SubscribeEnvelope};

    #[tokio::test]
    async fn publish_event_still_reaches_other_subscribers_when_one_send_fails() {
        let server_transport = protocol_testkit::server();
        let client_a = server_transport.connect();
        let client_b = server_transport.connect();

        let (server_protocol, mut commands) = ServerProtocol::new(Arc::new(server_transport));

        client_a
            .publish(protocol_wire::encode(&Envelope::Subscribe(SubscribeEnvelope {
                stream_id: "orders".to_owned(),
            })))
            .await
            .unwrap();
        client_b
            .publish(protocol_wire::encode(&Envelope::Subscribe(SubscribeEnvelope {
                stream_id: "orders".to_owned(),
            })))
            .await
            .unwrap();
        // A barrier command: the intake task processes the merged inbound
        // stream strictly in order, so by the time this surfaces on
        // `commands`, both subscribes above are already registered.
        client_b
            .publish(protocol_wire::encode(&Envelope::Command(CommandEnvelope {
                id: "barrier".to_owned(),
                target: "orders".to_owned(),
                name: "Barrier".to_owned(),
                payload: serde_json::json!({}),
            })))
            .await
            .unwrap();
        let (_conn, command) = commands.next().await.expect("barrier command should arrive");
        assert_eq!(command.name, "Barrier");

        // Dropping client_a's handle drops its inbound receiver, so any
        // further send_to addressed to it now fails.
        drop(client_a);

        let event = Event {
            position: Position {
                stream_id: StreamId::from("orders"),
                event_number: 0,
            },
            event_type: "OrderPlaced".to_owned(),
            data: serde_json::json!({}),
            timestamp: chrono::Utc::now(),
        };
        server_protocol.publish_event(&StreamId::from("orders"), &event).await;

        let mut inbound_b = client_b.inbound();
        let (_id, frame) = inbound_b.next().await.expect("client_b should still receive the event");
        match protocol_wire::decode(&frame).unwrap() {
            Envelope::Event(envelope) => assert_eq!(envelope.event_type, "OrderPlaced"),
            other => panic!("expected an event envelope, got {other:?}"),
        }
    }
}
