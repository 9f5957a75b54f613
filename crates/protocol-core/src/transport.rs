use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// A connection lifecycle event, as externally observed by the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent<C> {
    Connected(C),
    Disconnected(C),
}

/// The raw, unstructured transport the protocol engine runs on top of.
///
/// This is the interface contract spec.md §1 calls an "external
/// collaborator" — the protocol never constructs a `Transport` itself and
/// never interprets anything about frames beyond treating them as opaque
/// UTF-8 text. `protocol-testkit` provides an in-memory implementation for
/// tests; `protocol-gateway` provides a WebSocket-backed one.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identifies one connected peer on the server side. The client side
    /// only ever has one connection and never sees this type.
    type ConnectionId: Clone + Eq + Hash + Send + Sync + Debug;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Client-side: send a frame to the (sole) peer.
    async fn publish(&self, frame: String) -> Result<(), Self::Error>;

    /// Server-side: send a frame to one specific connection.
    async fn send_to(&self, connection: Self::ConnectionId, frame: String) -> Result<(), Self::Error>;

    /// Server-side: send a frame to every currently connected peer.
    async fn broadcast(&self, frame: String) -> Result<(), Self::Error>;

    /// The stream of inbound frames, tagged with which connection they
    /// arrived on (the client side uses a single fixed connection id).
    fn inbound(&self) -> BoxStream<'_, (Self::ConnectionId, String)>;

    /// The stream of connection lifecycle events.
    fn connection_events(&self) -> BoxStream<'_, ConnectionEvent<Self::ConnectionId>>;
}
