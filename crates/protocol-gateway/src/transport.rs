// A real `Transport` over `axum`'s WebSocket upgrade, one connection per
// accepted socket. Mirrors the shape of `ws_forwarder.rs`'s per-connection
// task plus `AppState`'s per-device outbound channel, generalized from
// "one forwarder" to "any number of protocol-core clients".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use protocol_core::{ConnectionEvent, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("websocket transport: connection is gone")]
pub struct Disconnected;

struct Shared {
    outboxes: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<String>>>,
    inbound_tx: mpsc::UnboundedSender<(ConnectionId, String)>,
    inbound_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<(ConnectionId, String)>>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent<ConnectionId>>,
    events_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<ConnectionEvent<ConnectionId>>>>,
}

/// Server-side `Transport`: every accepted WebSocket connection registers
/// its outbound sender here and forwards inbound text frames into one
/// shared queue, the same fan-in shape `intake::run` expects.
#[derive(Clone)]
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                outboxes: Mutex::new(HashMap::new()),
                inbound_tx,
                inbound_rx: Arc::new(AsyncMutex::new(inbound_rx)),
                events_tx,
                events_rx: Arc::new(AsyncMutex::new(events_rx)),
            }),
        }
    }

    /// `axum` handler: upgrade the HTTP request to a WebSocket and hand the
    /// socket to [`Self::handle_socket`].
    pub async fn ws_handler(State(transport): State<WebSocketTransport>, ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(move |socket| async move { transport.handle_socket(socket).await })
    }

    async fn handle_socket(&self, socket: WebSocket) {
        let id = ConnectionId(Uuid::new_v4());
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<String>();
        self.shared.outboxes.lock().expect("gateway transport poisoned").insert(id, outbox_tx);
        let _ = self.shared.events_tx.send(ConnectionEvent::Connected(id));
        tracing::info!(connection = %id, "client connected");

        let (mut write, mut read) = socket.split();
        loop {
            tokio::select! {
                inbound = read.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if self.shared.inbound_tx.send((id, text.to_string())).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!(connection = %id, error = %err, "websocket read error");
                            break;
                        }
                    }
                }
                outbound = outbox_rx.recv() => {
                    match outbound {
                        Some(frame) => {
                            if write.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.shared.outboxes.lock().expect("gateway transport poisoned").remove(&id);
        let _ = self.shared.events_tx.send(ConnectionEvent::Disconnected(id));
        tracing::info!(connection = %id, "client disconnected");
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type ConnectionId = ConnectionId;
    type Error = Disconnected;

    async fn publish(&self, frame: String) -> Result<(), Self::Error> {
        self.broadcast(frame).await
    }

    async fn send_to(&self, connection: Self::ConnectionId, frame: String) -> Result<(), Self::Error> {
        let outbox = self
            .shared
            .outboxes
            .lock()
            .expect("gateway transport poisoned")
            .get(&connection)
            .cloned();
        match outbox {
            Some(outbox) => outbox.send(frame).map_err(|_| Disconnected),
            None => Err(Disconnected),
        }
    }

    async fn broadcast(&self, frame: String) -> Result<(), Self::Error> {
        let outboxes: Vec<_> = self.shared.outboxes.lock().expect("gateway transport poisoned").values().cloned().collect();
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
        let receiver = Arc::clone(&self.shared.inbound_rx);
        Box::pin(futures_util::stream::unfold(receiver, |receiver| async move {
            let item = receiver.lock().await.recv().await;
            item.map(|item| (item, receiver))
        }))
    }

    fn connection_events(&self) -> BoxStream<'_, ConnectionEvent<Self::ConnectionId>> {
        let receiver = Arc::clone(&self.shared.events_rx);
        Box::pin(futures_util::stream::unfold(receiver, |receiver| async move {
            let item = receiver.lock().await.recv().await;
            item.map(|item| (item, receiver))
        }))
    }
}
