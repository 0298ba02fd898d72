//! Configuration for the prefetch subsystem

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Consume argument carrying the prefetch limit.
pub const DEFAULT_PREFETCH_ARGUMENT: &str = "x-prefetch";

/// Broker configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Prefetch used when a consume request carries none (0 = unlimited)
    pub default_prefetch: u32,
    /// Largest prefetch a consumer may ask for (`u32::MAX` = no cap)
    pub max_prefetch: u32,
    /// Argument name the prefetch limit is read from
    pub prefetch_argument: String,
    /// Prefix for server-generated consumer tags
    pub consumer_tag_prefix: String,
    /// Events buffered per bus subscriber
    pub event_bus_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_prefetch: 0,
            max_prefetch: u32::MAX,
            prefetch_argument: DEFAULT_PREFETCH_ARGUMENT.to_string(),
            consumer_tag_prefix: "amq.ctag-".to_string(),
            event_bus_capacity: qmq_bus::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Configuration errors
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("default_prefetch {default} exceeds max_prefetch {max}")]
    DefaultAboveMax { default: u32, max: u32 },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("event_bus_capacity must be at least 1")]
    ZeroBusCapacity,
}

impl BrokerConfig {
    /// Defaults overridden by `QMQ_DEFAULT_PREFETCH`, `QMQ_MAX_PREFETCH` and
    /// `QMQ_EVENT_BUS_CAPACITY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`BrokerConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = parse_var(&lookup, "QMQ_DEFAULT_PREFETCH") {
            config.default_prefetch = value;
        }
        if let Some(value) = parse_var(&lookup, "QMQ_MAX_PREFETCH") {
            config.max_prefetch = value;
        }
        if let Some(value) = parse_var(&lookup, "QMQ_EVENT_BUS_CAPACITY") {
            config.event_bus_capacity = value;
        }
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_prefetch > self.max_prefetch {
            return Err(ConfigError::DefaultAboveMax {
                default: self.default_prefetch,
                max: self.max_prefetch,
            });
        }
        if self.prefetch_argument.is_empty() {
            return Err(ConfigError::Empty("prefetch_argument"));
        }
        if self.consumer_tag_prefix.is_empty() {
            return Err(ConfigError::Empty("consumer_tag_prefix"));
        }
        if self.event_bus_capacity == 0 {
            return Err(ConfigError::ZeroBusCapacity);
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = key, value = %raw, "Ignoring malformed configuration override");
            None
        }
    }
}
