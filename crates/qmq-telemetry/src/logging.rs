//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber with an `EnvFilter` and either a
//! human-readable or a JSON formatting layer. Installation is idempotent:
//! when a global subscriber already exists the call reports
//! [`LoggingStatus::AlreadyInstalled`] instead of failing, which lets every
//! test call [`init_logging`] freely.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Outcome of [`init_logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingStatus {
    /// This call installed the global subscriber.
    Installed,
    /// A global subscriber was already present and was left untouched.
    AlreadyInstalled,
    /// Console output is disabled; nothing was installed.
    Disabled,
}

/// Install the global tracing subscriber described by `config`.
pub fn init_logging(config: &TelemetryConfig) -> Result<LoggingStatus, TelemetryError> {
    if !config.console_output {
        return Ok(LoggingStatus::Disabled);
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))?;

    let installed = if config.json_logs {
        // JSON output for containers/production
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(config.thread_ids)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
    } else {
        // Pretty output for development
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(config.thread_ids)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    match installed {
        Ok(()) => {
            tracing::info!(
                service = %config.service_name,
                json_logs = config.json_logs,
                "Logging initialized"
            );
            Ok(LoggingStatus::Installed)
        }
        Err(_) => Ok(LoggingStatus::AlreadyInstalled),
    }
}

/// Helper to create structured log entries tagged with a queue name.
#[macro_export]
macro_rules! log_queue_event {
    ($level:ident, $queue:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            queue = %$queue,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a delivery-related event with standard fields.
#[macro_export]
macro_rules! log_delivery_event {
    ($level:ident, $msg:expr, $channel:expr, $delivery_tag:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            channel = %$channel,
            delivery_tag = %$delivery_tag,
            $($($field)*,)?
            $msg
        )
    };
}
