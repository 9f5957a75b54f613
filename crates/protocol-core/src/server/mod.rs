mod intake;
mod protocol;
mod registry;

pub use intake::CommandStream;
pub use protocol::{ServerProtocol, TransportError};
pub use registry::SubscriptionRegistry;
