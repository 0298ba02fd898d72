//! Value objects for the prefetch subsystem.
//!
//! Consume arguments, the validated prefetch limit, settlement variants and
//! status snapshots.

use super::entities::{ConsumerTag, DeliveryTag};
use super::errors::BrokerError;
use crate::config::{BrokerConfig, DEFAULT_PREFETCH_ARGUMENT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single value in an AMQP field table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Table(FieldTable),
    Array(Vec<FieldValue>),
    Void,
}

impl FieldValue {
    /// The value as a signed integer, if it is any integer type.
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::U8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::I64(v) => Some(v.into()),
            Self::U64(v) => Some(v.into()),
            _ => None,
        }
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I8(_) | Self::I16(_) | Self::I32(_) | Self::I64(_) => "signed integer",
            Self::U8(_) | Self::U16(_) | Self::U32(_) | Self::U64(_) => "unsigned integer",
            Self::F32(_) | Self::F64(_) => "float",
            Self::String(_) => "string",
            Self::Table(_) => "table",
            Self::Array(_) => "array",
            Self::Void => "void",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Named arguments attached to a consume request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldTable(BTreeMap<String, FieldValue>);

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A validated prefetch limit. Zero means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Prefetch(u32);

impl Prefetch {
    pub const UNLIMITED: Prefetch = Prefetch(0);

    /// Validate a raw limit against the configured maximum.
    pub fn new(limit: u32, config: &BrokerConfig) -> Result<Self, BrokerError> {
        if limit > config.max_prefetch {
            return Err(BrokerError::PrefetchOutOfRange {
                value: limit.into(),
                max: config.max_prefetch,
            });
        }
        Ok(Self(limit))
    }

    /// Read the prefetch limit out of a consume argument table.
    ///
    /// Absent means `config.default_prefetch`. Any non-negative integer is
    /// accepted unless `config.max_prefetch` sets a lower cap.
    pub fn from_arguments(
        arguments: &FieldTable,
        config: &BrokerConfig,
    ) -> Result<Self, BrokerError> {
        match arguments.get(&config.prefetch_argument) {
            None => Ok(Self(config.default_prefetch)),
            Some(value) => Self::from_field(value, config),
        }
    }

    /// Validate a single argument value.
    pub fn from_field(value: &FieldValue, config: &BrokerConfig) -> Result<Self, BrokerError> {
        let Some(raw) = value.as_integer() else {
            return Err(BrokerError::PrefetchWrongType {
                found: value.type_name(),
            });
        };
        if raw < 0 {
            return Err(BrokerError::PrefetchOutOfRange {
                value: raw,
                max: config.max_prefetch,
            });
        }
        if config.max_prefetch != u32::MAX && raw > i128::from(config.max_prefetch) {
            return Err(BrokerError::PrefetchOutOfRange {
                value: raw,
                max: config.max_prefetch,
            });
        }
        // Without a configured cap, limits past u32 saturate
        Ok(Self(u32::try_from(raw).unwrap_or(u32::MAX)))
    }

    pub fn limit(&self) -> u32 {
        self.0
    }

    pub fn is_unlimited(&self) -> bool {
        self.0 == 0
    }
}

/// How a set of deliveries is being settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
    /// Forced redelivery; always requeues.
    Recover,
}

impl Settlement {
    /// Whether the settled messages go back to their queue.
    pub fn requeues(&self) -> bool {
        matches!(self, Self::Nack { requeue: true } | Self::Recover)
    }

    pub(crate) fn as_event_kind(&self) -> qmq_bus::SettleKind {
        match *self {
            Self::Ack => qmq_bus::SettleKind::Ack,
            Self::Nack { requeue } => qmq_bus::SettleKind::Nack { requeue },
            Self::Recover => qmq_bus::SettleKind::Recover,
        }
    }
}

/// Options for registering a consumer.
#[derive(Clone, Debug, Default)]
pub struct ConsumeOptions {
    /// Empty means the broker generates one.
    pub consumer_tag: String,
    pub auto_ack: bool,
    pub arguments: FieldTable,
}

impl ConsumeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn prefetch(mut self, limit: impl Into<FieldValue>) -> Self {
        self.arguments.insert(DEFAULT_PREFETCH_ARGUMENT, limit);
        self
    }

    pub fn arguments(mut self, arguments: FieldTable) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Snapshot of a queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub name: String,
    /// Messages waiting for dispatch.
    pub ready: usize,
    pub consumers: usize,
}

/// Credit snapshot for one consumer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsumerStatus {
    pub consumer_tag: ConsumerTag,
    pub queue: String,
    pub limit: u32,
    pub outstanding: u32,
    pub auto_ack: bool,
}

/// Snapshot of a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub open: bool,
    pub unacked: usize,
    pub next_delivery_tag: DeliveryTag,
    pub consumers: Vec<ConsumerStatus>,
}
