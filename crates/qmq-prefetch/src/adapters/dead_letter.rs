//! Dead-letter sink adapters.
//!
//! Messages nacked with `requeue = false` leave the broker through one of
//! these.

use crate::domain::{Message, QueueName};
use crate::ports::DeadLetterSink;
use qmq_bus::{BrokerEvent, EventPublisher, DLQ_TOPIC};
use qmq_telemetry::metrics;
use std::sync::Arc;
use tracing::debug;

/// Forwards dead letters to the event bus as
/// [`BrokerEvent::MessageDeadLettered`].
pub struct BusDeadLetterSink {
    publisher: Arc<dyn EventPublisher>,
}

impl BusDeadLetterSink {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

impl DeadLetterSink for BusDeadLetterSink {
    fn dead_letter(&self, queue: &QueueName, message: Message) {
        metrics::DEAD_LETTERED.inc();
        debug!(
            queue = %queue,
            message_id = %message.id,
            topic = DLQ_TOPIC,
            "Dead-lettering message"
        );
        self.publisher.publish(BrokerEvent::MessageDeadLettered {
            queue: queue.clone(),
            message_id: message.id.0,
            payload: message.payload.to_vec(),
        });
    }
}

/// Drops dead letters.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardDeadLetters;

impl DeadLetterSink for DiscardDeadLetters {
    fn dead_letter(&self, queue: &QueueName, message: Message) {
        metrics::DEAD_LETTERED.inc();
        debug!(queue = %queue, message_id = %message.id, "Discarding message");
    }
}
