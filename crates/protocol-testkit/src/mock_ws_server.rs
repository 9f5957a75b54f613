// A mock WebSocket peer for testing a real `WebSocketTransport` client
// implementation against actual sockets, rather than the in-memory double.
//
// Accepts connections on ws://127.0.0.1:<port>. Every `command` envelope
// gets an immediate synthetic success result with a monotonically
// increasing position per target stream. `subscribe` envelopes register
// interest; the test drives event delivery explicitly via `push_event`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use futures_util::{SinkExt, StreamExt};
use protocol_wire::{CommandResultEnvelope, Envelope, EventEnvelope, Position};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

struct ServerState {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>>,
    next_event_number: Mutex<HashMap<String, u64>>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_event_number: Mutex::new(HashMap::new()),
        }
    }
}

pub struct MockWsServer {
    addr: SocketAddr,
    state: std::sync::Arc<ServerState>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    /// Start the mock server, binding to a random available port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = std::sync::Arc::new(ServerState::new());

        let accept_state = std::sync::Arc::clone(&state);
        let task = tokio::spawn(async move {
            Self::accept_loop(listener, accept_state).await;
        });

        Ok(Self { addr, state, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Deliver `event` to every connection currently subscribed to
    /// `stream_id`, as if the server-side application had called
    /// `ServerProtocol::publish_event`.
    pub fn push_event(&self, stream_id: &str, event: EventEnvelope) {
        let subscribers = self.state.subscribers.lock().expect("mock server state poisoned");
        if let Some(connections) = subscribers.get(stream_id) {
            for sender in connections {
                let _ = sender.send(Envelope::Event(event.clone()));
            }
        }
    }

    async fn accept_loop(listener: TcpListener, state: std::sync::Arc<ServerState>) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let state = std::sync::Arc::clone(&state);
                    tokio::spawn(async move {
                        let _ = Self::handle_connection(stream, state).await;
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        state: std::sync::Arc<ServerState>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Envelope>();

        loop {
            tokio::select! {
                inbound = read.next() => {
                    let msg = match inbound {
                        Some(Ok(msg)) => msg,
                        Some(Err(err)) => return Err(err.into()),
                        None => break,
                    };
                    let text = match msg {
                        Message::Text(t) => t,
                        Message::Close(_) => break,
                        Message::Ping(data) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        _ => continue,
                    };

                    match protocol_wire::decode(&text)? {
                        Envelope::Command(command) => {
                            let position = {
                                let mut counters = state.next_event_number.lock().expect("mock server state poisoned");
                                let counter = counters.entry(command.target.clone()).or_insert(0);
                                let position = Position {
                                    stream_id: command.target.clone(),
                                    event_number: *counter,
                                };
                                *counter += 1;
                                position
                            };
                            let result = Envelope::CommandResult(CommandResultEnvelope {
                                command_id: command.id,
                                success: true,
                                position: Some(position),
                                error: None,
                            });
                            write.send(Message::Text(protocol_wire::encode(&result).into())).await?;
                        }
                        Envelope::Subscribe(subscribe) => {
                            state
                                .subscribers
                                .lock()
                                .expect("mock server state poisoned")
                                .entry(subscribe.stream_id)
                                .or_default()
                                .push(push_tx.clone());
                        }
                        Envelope::CommandResult(_) | Envelope::Event(_) => {
                            // A well-behaved client never sends these.
                        }
                    }
                }
                Some(event) = push_rx.recv() => {
                    write.send(Message::Text(protocol_wire::encode(&event).into())).await?;
                }
            }
        }

        Ok(())
    }
}
