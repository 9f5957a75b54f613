// In-process Transport double: no sockets, no serialization boundary
// beyond the envelope codec itself. Fast enough to drive hundreds of
// correlation/subscription scenarios without a network stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use protocol_core::{ConnectionEvent, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

#[derive(Debug, thiserror::Error)]
#[error("in-memory transport: peer is gone")]
pub struct Disconnected;

struct Hub {
    next_id: AtomicU64,
    outboxes: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<String>>>,
    inbound_tx: mpsc::UnboundedSender<(ConnectionId, String)>,
    inbound_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<(ConnectionId, String)>>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent<ConnectionId>>,
    events_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<ConnectionEvent<ConnectionId>>>>,
}

/// A server-side transport with zero or more simulated connections.
/// Created with [`server`]; call [`ServerTransport::connect`] to add a
/// client end that shares this server's address space.
pub struct ServerTransport {
    hub: Arc<Hub>,
}

/// A single simulated client connection to a [`ServerTransport`]. Has no
/// notion of other connections, matching the real `Transport` contract
/// that a client only ever sees its one peer.
pub struct ClientTransport {
    id: ConnectionId,
    hub: Arc<Hub>,
    inbound: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
}

/// Start a fresh in-memory server with no connections yet.
pub fn server() -> ServerTransport {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    ServerTransport {
        hub: Arc::new(Hub {
            next_id: AtomicU64::new(0),
            outboxes: Mutex::new(HashMap::new()),
            inbound_tx,
            inbound_rx: Arc::new(AsyncMutex::new(inbound_rx)),
            events_tx,
            events_rx: Arc::new(AsyncMutex::new(events_rx)),
        }),
    }
}

/// Convenience for the common single-client test: a server with exactly
/// one connection already established.
pub fn pair() -> (ClientTransport, ServerTransport) {
    let server = server();
    let client = server.connect();
    (client, server)
}

impl ServerTransport {
    /// Register a new simulated client, emitting a `Connected` event this
    /// server's `connection_events()` stream will observe.
    pub fn connect(&self) -> ClientTransport {
        let id = ConnectionId(self.hub.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        self.hub.outboxes.lock().expect("in-memory hub poisoned").insert(id, outbox_tx);
        let _ = self.hub.events_tx.send(ConnectionEvent::Connected(id));
        ClientTransport {
            id,
            hub: Arc::clone(&self.hub),
            inbound: Arc::new(AsyncMutex::new(outbox_rx)),
        }
    }
}

#[async_trait]
impl Transport for ServerTransport {
    type ConnectionId = ConnectionId;
    type Error = Disconnected;

    async fn publish(&self, frame: String) -> Result<(), Self::Error> {
        self.broadcast(frame).await
    }

    async fn send_to(&self, connection: Self::ConnectionId, frame: String) -> Result<(), Self::Error> {
        let outbox = self
            .hub
            .outboxes
            .lock()
            .expect("in-memory hub poisoned")
            .get(&connection)
            .cloned();
        match outbox {
            Some(outbox) => outbox.send(frame).map_err(|_| Disconnected),
            None => Err(Disconnected),
        }
    }

    async fn broadcast(&self, frame: String) -> Result<(), Self::Error> {
        let outboxes: Vec<_> = self.hub.outboxes.lock().expect("in-memory hub poisoned").values().cloned().collect();
        let mut any_failed = false;
        for outbox in outboxes {
            if outbox.send(frame.clone()).is_err() {
                any_failed = true;
            }
        }
        if any_failed {
            Err(Disconnected)
        } else {
            Ok(())
        }
    }

    fn inbound(&self) -> BoxStream<'_, (Self::ConnectionId, String)> {
        let receiver = Arc::clone(&self.hub.inbound_rx);
        Box::pin(futures_util::stream::unfold(receiver, |receiver| async move {
            let item = receiver.lock().await.recv().await;
            item.map(|item| (item, receiver))
        }))
    }

    fn connection_events(&self) -> BoxStream<'_, ConnectionEvent<Self::ConnectionId>> {
        let receiver = Arc::clone(&self.hub.events_rx);
        Box::pin(futures_util::stream::unfold(receiver, |receiver| async move {
            let item = receiver.lock().await.recv().await;
            item.map(|item| (item, receiver))
        }))
    }
}

#[async_trait]
impl Transport for ClientTransport {
    type ConnectionId = ();
    type Error = Disconnected;

    async fn publish(&self, frame: String) -> Result<(), Self::Error> {
        self.hub.inbound_tx.send((self.id, frame)).map_err(|_| Disconnected)
    }

    async fn send_to(&self, _connection: (), frame: String) -> Result<(), Self::Error> {
        self.publish(frame).await
    }

    async fn broadcast(&self, frame: String) -> Result<(), Self::Error> {
        self.publish(frame).await
    }

    fn inbound(&self) -> BoxStream<'_, ((), String)> {
        let receiver = Arc::clone(&self.inbound);
        Box::pin(futures_util::stream::unfold(receiver, |receiver| async move {
            let item = receiver.lock().await.recv().await;
            item.map(|frame| (((), frame), receiver))
        }))
    }

    fn connection_events(&self) -> BoxStream<'_, ConnectionEvent<()>> {
        // A client never observes its own connection's lifecycle through
        // this interface; reconnection is out of scope (see SPEC_FULL.md).
        Box::pin(futures_util::stream::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn a_frame_published_by_the_client_reaches_the_servers_inbound_stream() {
        let (client, server) = pair();
        client.publish("hello".to_owned()).await.unwrap();
        let mut inbound = server.inbound();
        let (_conn, frame) = inbound.next().await.unwrap();
        assert_eq!(frame, "hello");
    }

    #[tokio::test]
    async fn send_to_reaches_only_the_targeted_connection() {
        let server = server();
        let client_a = server.connect();
        let client_b = server.connect();

        let mut inbound_a = client_a.inbound();
        let mut inbound_b = client_b.inbound();

        server.send_to(ConnectionId(0), "for-a".to_owned()).await.unwrap();

        let (_, frame) = inbound_a.next().await.unwrap();
        assert_eq!(frame, "for-a");
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), inbound_b.next())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connected_client() {
        let server = server();
        let client_a = server.connect();
        let client_b = server.connect();

        let mut inbound_a = client_a.inbound();
        let mut inbound_b = client_b.inbound();

        server.broadcast("everyone".to_owned()).await.unwrap();

        assert_eq!(inbound_a.next().await.unwrap().1, "everyone");
        assert_eq!(inbound_b.next().await.unwrap().1, "everyone");
    }

    #[tokio::test]
    async fn connecting_emits_a_connected_event() {
        let server = server();
        let mut events = server.connection_events();
        let _client = server.connect();
        assert_eq!(events.next().await, Some(ConnectionEvent::Connected(ConnectionId(0))));
    }
}
