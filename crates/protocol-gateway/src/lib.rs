//! Runnable example service wiring `protocol-core` to a real WebSocket
//! transport. Exists so the protocol engine in this workspace has one
//! concrete, buildable consumer beyond its test doubles — the ambient
//! CLI/config/logging surface spec.md excludes as a *feature* of the core,
//! but that a real repository in this shape always carries.

pub mod demo_store;
pub mod transport;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use protocol_core::ServerProtocol;

pub use transport::{ConnectionId, Disconnected, WebSocketTransport};

/// Build the `axum` router exposing `/ws`, and spawn the protocol engine
/// plus the demo event store behind it. Shared by the binary and the
/// integration tests so both exercise the exact same wiring.
pub fn build(transport: Arc<WebSocketTransport>) -> Router {
    let (server, commands) = ServerProtocol::new(Arc::clone(&transport));
    let server = Arc::new(server);
    tokio::spawn(demo_store::run(Arc::clone(&server), commands));

    Router::new()
        .route("/ws", get(WebSocketTransport::ws_handler))
        .with_state((*transport).clone())
}
