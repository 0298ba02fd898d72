//! # Broker Errors
//!
//! Error conditions for the dispatch and acknowledgement paths, with their
//! classification and AMQP reply codes.

use super::entities::{ChannelId, ConsumerTag, DeliveryTag};
use thiserror::Error;

/// Error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed consume argument. Nothing was registered.
    InvalidArgument,
    /// Unknown or already settled delivery tag. Nothing changed.
    PreconditionFailed,
    /// Queue or consumer does not exist.
    NotFound,
    /// Consumer tag already in use on the channel.
    NotAllowed,
    /// The channel is closed.
    ChannelError,
}

/// Broker error type.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("prefetch argument must be an integer, got {found}")]
    PrefetchWrongType { found: &'static str },

    #[error("prefetch argument {value} outside 0..={max}")]
    PrefetchOutOfRange { value: i128, max: u32 },

    #[error("unknown delivery tag {tag} on channel {channel}")]
    UnknownDeliveryTag { channel: ChannelId, tag: DeliveryTag },

    #[error("no queue '{0}'")]
    QueueNotFound(String),

    #[error("no consumer '{tag}' on channel {channel}")]
    ConsumerNotFound { channel: ChannelId, tag: ConsumerTag },

    #[error("consumer tag '{tag}' already in use on channel {channel}")]
    ConsumerTagInUse { channel: ChannelId, tag: ConsumerTag },

    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PrefetchWrongType { .. } | Self::PrefetchOutOfRange { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::UnknownDeliveryTag { .. } => ErrorKind::PreconditionFailed,
            Self::QueueNotFound(_) | Self::ConsumerNotFound { .. } => ErrorKind::NotFound,
            Self::ConsumerTagInUse { .. } => ErrorKind::NotAllowed,
            Self::ChannelClosed(_) => ErrorKind::ChannelError,
        }
    }

    /// AMQP reply code carried in the channel close.
    pub fn reply_code(&self) -> u16 {
        match self.kind() {
            // Bad prefetch arguments are reported as precondition-failed too
            ErrorKind::InvalidArgument | ErrorKind::PreconditionFailed => 406,
            ErrorKind::NotFound => 404,
            ErrorKind::NotAllowed => 530,
            ErrorKind::ChannelError => 504,
        }
    }

    /// Short label used for the consume-rejected metric.
    pub(crate) fn metric_label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotAllowed => "tag_in_use",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::ChannelError => "channel_closed",
        }
    }
}
