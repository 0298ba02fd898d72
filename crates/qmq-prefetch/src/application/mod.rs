//! Application layer: the broker, channels, consumers and the queue
//! dispatcher that ties them together.

pub mod broker;
pub mod channel;
pub mod dispatcher;

pub use broker::Broker;
pub use channel::{Channel, Consumer, REPLY_SUCCESS};
pub use dispatcher::DispatchReport;
