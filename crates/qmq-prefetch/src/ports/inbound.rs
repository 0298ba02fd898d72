//! # Inbound Ports - BrokerApi / ChannelApi
//!
//! Driving ports used by a protocol front end. Frames arrive already
//! decoded; each maps onto one method here.
//!
//! | Frame | Method |
//! |-------|--------|
//! | `basic.publish` | `BrokerApi::publish` |
//! | `basic.consume` | `ChannelApi::consume` |
//! | `basic.cancel` | `ChannelApi::cancel` |
//! | `basic.ack` | `ChannelApi::ack` |
//! | `basic.nack` | `ChannelApi::nack` |
//! | `basic.reject` | `ChannelApi::reject` |
//! | `basic.recover` | `ChannelApi::recover` |
//! | `basic.get` | `ChannelApi::get` |
//! | `channel.close` | `ChannelApi::close_with` |

use crate::application::{Channel, Consumer};
use crate::domain::{
    BrokerError, ChannelId, ChannelStatus, ConsumeOptions, ConsumerTag, DeliveryTag, GetResponse,
    MessageId, QueueStatus,
};
use bytes::Bytes;

/// Broker-wide operations.
pub trait BrokerApi: Send + Sync {
    /// Declare a queue. Returns false if it already existed.
    fn declare_queue(&self, name: &str) -> bool;

    /// Append a message and dispatch it if a consumer has credit.
    ///
    /// # Errors
    /// - `QueueNotFound`
    fn publish(&self, queue: &str, payload: Bytes) -> Result<MessageId, BrokerError>;

    fn open_channel(&self) -> Channel;

    fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError>;
}

/// Per-channel consume and acknowledgement operations.
pub trait ChannelApi: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Register a consumer.
    ///
    /// # Errors
    /// - `PrefetchWrongType` / `PrefetchOutOfRange`: nothing registered
    /// - `ConsumerTagInUse`, `QueueNotFound`, `ChannelClosed`
    fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Consumer, BrokerError>;

    /// Cancel a consumer and requeue its outstanding deliveries.
    fn cancel(&self, consumer_tag: &ConsumerTag) -> Result<usize, BrokerError>;

    /// # Errors
    /// - `UnknownDeliveryTag`: unknown or already settled tag; nothing changed
    fn ack(&self, tag: DeliveryTag, multiple: bool) -> Result<usize, BrokerError>;

    /// # Errors
    /// - `UnknownDeliveryTag`: unknown or already settled tag; nothing changed
    fn nack(&self, tag: DeliveryTag, multiple: bool, requeue: bool) -> Result<usize, BrokerError>;

    fn reject(&self, tag: DeliveryTag, requeue: bool) -> Result<usize, BrokerError>;

    /// Requeue everything outstanding on the channel.
    fn recover(&self) -> Result<usize, BrokerError>;

    fn get(&self, queue: &str, auto_ack: bool) -> Result<Option<GetResponse>, BrokerError>;

    /// Close the channel, requeueing everything outstanding.
    fn close_with(&self, reply_code: u16) -> usize;

    fn status(&self) -> ChannelStatus;
}
