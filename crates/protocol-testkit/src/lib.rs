// protocol-testkit: Transport test doubles for exercising protocol-core
// without a real network stack, plus a raw-socket mock peer for the cases
// that do need one.

pub mod in_memory;
pub mod mock_ws_client;
pub mod mock_ws_server;

pub use in_memory::{pair, server, ClientTransport, ConnectionId, Disconnected, ServerTransport};
pub use mock_ws_client::MockWsClient;
pub use mock_ws_server::MockWsServer;
