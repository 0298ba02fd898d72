//! Ports layer (hexagonal architecture).
//!
//! - `inbound`: BrokerApi, ChannelApi (driving)
//! - `outbound`: MessageStore, DeadLetterSink (driven)

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
