//! Core domain entities for the prefetch subsystem.
//!
//! Identifiers, messages and deliveries. A delivery follows this state
//! machine:
//!
//! ```text
//! [DELIVERED] ──ack──→ [ACKED]
//!      │
//!      ├──nack(requeue=false)──→ [DEAD-LETTERED]
//!      │
//!      └──nack(requeue=true) / recover / cancel──→ [READY] ──dispatch──→ [DELIVERED, redelivered]
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue name.
pub type QueueName = String;

/// Channel identifier, unique per broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery tag. Unique and strictly increasing within a channel, starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker-assigned message identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consumer tag. Unique among the live consumers of a channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsumerTag(String);

impl ConsumerTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// A message sitting in a queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Bytes,
    /// Set once the message has been handed out and came back.
    pub redelivered: bool,
}

impl Message {
    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
            redelivered: false,
        }
    }

    /// The same message marked for redelivery.
    pub fn into_redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }
}

/// Who holds an outstanding delivery.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryOwner {
    /// A registered consumer.
    Consumer(ConsumerTag),
    /// A `basic.get` on the channel. Carries no credit.
    Get,
}

impl DeliveryOwner {
    pub fn consumer(&self) -> Option<&ConsumerTag> {
        match self {
            Self::Consumer(tag) => Some(tag),
            Self::Get => None,
        }
    }
}

impl fmt::Display for DeliveryOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consumer(tag) => write!(f, "consumer '{}'", tag),
            Self::Get => f.write_str("basic.get"),
        }
    }
}

/// A message handed to a consumer. Immutable once emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub consumer_tag: ConsumerTag,
    pub delivery_tag: DeliveryTag,
    pub queue: QueueName,
    pub message_id: MessageId,
    pub payload: Bytes,
    pub redelivered: bool,
}

impl Delivery {
    /// Rebuild the queued message, e.g. when the delivery could not be sent.
    pub fn to_message(&self) -> Message {
        Message {
            id: self.message_id,
            payload: self.payload.clone(),
            redelivered: self.redelivered,
        }
    }
}

/// Reply to a `basic.get`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetResponse {
    pub delivery_tag: DeliveryTag,
    pub queue: QueueName,
    pub message_id: MessageId,
    pub payload: Bytes,
    pub redelivered: bool,
    /// Ready messages left in the queue after this one.
    pub message_count: usize,
}

/// An outstanding delivery in a channel's unacked set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnackedEntry {
    pub delivery_tag: DeliveryTag,
    pub owner: DeliveryOwner,
    pub queue: QueueName,
    pub message: Message,
}
