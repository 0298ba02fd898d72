//! Command interface for protocol front ends.

pub mod commands;
pub mod handler;

pub use commands::{ChannelCommand, ChannelReply};
pub use handler::ChannelCommandHandler;
