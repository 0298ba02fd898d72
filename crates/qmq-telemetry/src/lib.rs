//! # Quantum-MQ Telemetry
//!
//! Observability for the broker: structured logging through `tracing` and
//! Prometheus metrics.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qmq_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! // Logs and metrics are now being collected
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QMQ_SERVICE_NAME` | `quantum-mq` | Service name in logs |
//! | `QMQ_LOG_LEVEL` | `info` | Log level filter |
//! | `QMQ_JSON_LOGS` | `false` | JSON formatted output |
//! | `QMQ_CONSOLE_OUTPUT` | `true` | Install the console subscriber |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingStatus};
pub use metrics::{gather_text, register_metrics, MetricsHandle};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first, they cannot conflict with an existing subscriber
    let metrics = register_metrics()?;
    let logging = init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
        logging,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
    logging: LoggingStatus,
    _metrics: MetricsHandle,
}

impl TelemetryGuard {
    /// How logging was set up.
    pub fn logging(&self) -> LoggingStatus {
        self.logging
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}
