mod correlation;
mod demux;
mod protocol;
mod subscription;

pub use correlation::{CorrelationTable, DuplicateCommandId};
pub use protocol::{ClientProtocol, SendError, SubscribeError, Subscription, COMMAND_DEADLINE};
pub use subscription::{DuplicateSubscription, SubscriptionTable};
