//! Correlated, multiplexed request/response and pub/sub protocol engine
//! sitting between a raw framed [`Transport`] and an event-sourced
//! application. See `protocol-wire` for the envelope codec this crate
//! builds on.

mod client;
mod server;
mod state;
mod transport;
mod types;

pub use client::{
    ClientProtocol, CorrelationTable, DuplicateCommandId, DuplicateSubscription, SendError,
    SubscribeError, Subscription, SubscriptionTable, COMMAND_DEADLINE,
};
pub use server::{CommandStream, ServerProtocol, SubscriptionRegistry, TransportError};
pub use state::{ConnectionState, PendingCommandState, SubscriptionState};
pub use transport::{ConnectionEvent, Transport};
pub use types::{Command, CommandId, CommandResult, CommandTimeoutError, Event, Position, StreamId};
