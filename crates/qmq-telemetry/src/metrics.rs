//! Prometheus metrics for the broker.
//!
//! All metrics follow the naming convention: `qmq_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., deliveries_total)
//! - **Gauge**: Value that can go up or down (e.g., unacked_messages)

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // DISPATCH METRICS
    // =========================================================================

    /// Messages handed to consumers
    pub static ref DELIVERIES: CounterVec = CounterVec::new(
        Opts::new("qmq_dispatch_deliveries_total", "Messages delivered to consumers"),
        &["ack_mode"]  // ack_mode: auto/manual
    ).expect("metric creation failed");

    /// Dispatch passes that stopped because every consumer was out of credit
    pub static ref CREDIT_BLOCKED: Counter = Counter::new(
        "qmq_dispatch_credit_blocked_total",
        "Dispatch passes parked with ready messages and no consumer credit"
    ).expect("metric creation failed");

    /// Messages published into queues
    pub static ref MESSAGES_PUBLISHED: Counter = Counter::new(
        "qmq_queue_messages_published_total",
        "Messages published into queues"
    ).expect("metric creation failed");

    // =========================================================================
    // ACKNOWLEDGEMENT METRICS
    // =========================================================================

    /// Deliveries acknowledged
    pub static ref ACKS: Counter = Counter::new(
        "qmq_ack_acknowledged_total",
        "Deliveries positively acknowledged"
    ).expect("metric creation failed");

    /// Deliveries negatively acknowledged
    pub static ref NACKS: CounterVec = CounterVec::new(
        Opts::new("qmq_ack_negative_total", "Deliveries negatively acknowledged"),
        &["requeue"]  // requeue: true/false
    ).expect("metric creation failed");

    /// Messages returned to the head of their queue
    pub static ref REQUEUED: CounterVec = CounterVec::new(
        Opts::new("qmq_ack_requeued_total", "Messages requeued for redelivery"),
        &["reason"]  // reason: nack/recover/cancel/close
    ).expect("metric creation failed");

    /// Messages handed to the dead-letter sink
    pub static ref DEAD_LETTERED: Counter = Counter::new(
        "qmq_ack_dead_lettered_total",
        "Messages rejected without requeue"
    ).expect("metric creation failed");

    /// Deliveries currently awaiting acknowledgement
    pub static ref UNACKED_MESSAGES: Gauge = Gauge::new(
        "qmq_ack_unacked_messages",
        "Deliveries currently awaiting acknowledgement"
    ).expect("metric creation failed");

    // =========================================================================
    // CONSUMER METRICS
    // =========================================================================

    /// Registered consumers
    pub static ref CONSUMERS_ACTIVE: Gauge = Gauge::new(
        "qmq_consumers_active",
        "Number of registered consumers"
    ).expect("metric creation failed");

    /// Rejected consume requests
    pub static ref CONSUME_REJECTED: CounterVec = CounterVec::new(
        Opts::new("qmq_consumers_rejected_total", "Consume requests rejected"),
        &["reason"]  // reason: invalid_argument/tag_in_use/not_found
    ).expect("metric creation failed");
}

/// Handle proving the metrics were registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    registered: usize,
}

impl MetricsHandle {
    /// Number of collectors registered by this call.
    pub fn registered(&self) -> usize {
        self.registered
    }
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; collectors already present are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Dispatch
        Box::new(DELIVERIES.clone()),
        Box::new(CREDIT_BLOCKED.clone()),
        Box::new(MESSAGES_PUBLISHED.clone()),
        // Acknowledgement
        Box::new(ACKS.clone()),
        Box::new(NACKS.clone()),
        Box::new(REQUEUED.clone()),
        Box::new(DEAD_LETTERED.clone()),
        Box::new(UNACKED_MESSAGES.clone()),
        // Consumers
        Box::new(CONSUMERS_ACTIVE.clone()),
        Box::new(CONSUME_REJECTED.clone()),
    ];

    let mut registered = 0;
    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) => registered += 1,
            Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { registered })
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
