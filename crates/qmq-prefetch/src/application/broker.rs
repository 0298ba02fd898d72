//! # Broker
//!
//! Owns the queues, the event bus and the dead-letter sink, and hands out
//! channels.

use super::channel::{Channel, ChannelCore};
use super::dispatcher::{QueueHandle, QueueState};
use crate::adapters::{BusDeadLetterSink, InMemoryMessageStore};
use crate::config::{BrokerConfig, ConfigError};
use crate::domain::{BrokerError, ChannelId, Message, MessageId, QueueName, QueueStatus};
use crate::ports::{BrokerApi, DeadLetterSink, MessageStore};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use qmq_bus::{
    BrokerEvent, EventFilter, EventPublisher, EventSubscriber, InMemoryEventBus, Subscription,
};
use qmq_telemetry::{log_queue_event, metrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// State shared by the broker, its channels and their consumers.
pub(crate) struct BrokerShared {
    pub(crate) config: BrokerConfig,
    queues: RwLock<HashMap<QueueName, QueueHandle>>,
    bus: Arc<InMemoryEventBus>,
    pub(crate) dead_letters: Arc<dyn DeadLetterSink>,
    next_message_id: AtomicU64,
    next_channel_id: AtomicU64,
}

impl BrokerShared {
    pub(crate) fn queue(&self, name: &str) -> Result<QueueHandle, BrokerError> {
        self.queues
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))
    }

    pub(crate) fn events(&self) -> &dyn EventPublisher {
        self.bus.as_ref()
    }

    /// Run a dispatch pass on `queue` if it exists.
    pub(crate) fn dispatch(&self, queue: &str) {
        if let Ok(handle) = self.queue(queue) {
            handle.lock().dispatch(self.events());
        }
    }
}

/// Entry point: declare queues, publish, open channels.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<BrokerShared>,
}

impl Broker {
    /// Broker whose dead letters go to the event bus.
    pub fn new(config: BrokerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let bus = Arc::new(InMemoryEventBus::with_capacity(config.event_bus_capacity));
        let dead_letters = Arc::new(BusDeadLetterSink::new(bus.clone()));
        Ok(Self::assemble(config, bus, dead_letters))
    }

    /// Broker with a custom dead-letter sink.
    pub fn with_dead_letters(
        config: BrokerConfig,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let bus = Arc::new(InMemoryEventBus::with_capacity(config.event_bus_capacity));
        Ok(Self::assemble(config, bus, dead_letters))
    }

    fn assemble(
        config: BrokerConfig,
        bus: Arc<InMemoryEventBus>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        info!(
            default_prefetch = config.default_prefetch,
            max_prefetch = config.max_prefetch,
            "Broker started"
        );
        Self {
            shared: Arc::new(BrokerShared {
                config,
                queues: RwLock::new(HashMap::new()),
                bus,
                dead_letters,
                next_message_id: AtomicU64::new(1),
                next_channel_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Declare an in-memory queue. Returns false if it already existed.
    pub fn declare_queue(&self, name: &str) -> bool {
        self.declare_queue_with_store(name, Box::new(InMemoryMessageStore::new()))
    }

    /// Declare a queue backed by `store`. An existing queue keeps its store.
    pub fn declare_queue_with_store(&self, name: &str, store: Box<dyn MessageStore>) -> bool {
        let mut queues = self.shared.queues.write();
        if queues.contains_key(name) {
            return false;
        }
        queues.insert(
            name.to_string(),
            Arc::new(Mutex::new(QueueState::new(name.to_string(), store))),
        );
        log_queue_event!(info, name, "Queue declared");
        true
    }

    /// Append a message to `queue` and dispatch.
    pub fn publish(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
    ) -> Result<MessageId, BrokerError> {
        let handle = self.shared.queue(queue)?;
        let id = MessageId(self.shared.next_message_id.fetch_add(1, Ordering::Relaxed));

        let mut state = handle.lock();
        state.push(Message::new(id, payload));
        metrics::MESSAGES_PUBLISHED.inc();
        self.shared.events().publish(BrokerEvent::MessagePublished {
            queue: queue.to_string(),
            message_id: id.0,
        });
        state.dispatch(self.shared.events());
        Ok(id)
    }

    pub fn open_channel(&self) -> Channel {
        let id = ChannelId(self.shared.next_channel_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(channel = %id, "Channel opened");
        Channel::new(Arc::new(ChannelCore::new(id)), self.shared.clone())
    }

    pub fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError> {
        let handle = self.shared.queue(queue)?;
        let state = handle.lock();
        Ok(QueueStatus {
            name: queue.to_string(),
            ready: state.ready(),
            consumers: state.consumer_count(),
        })
    }

    /// Subscribe to broker events.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.shared.bus.subscribe(filter)
    }

    pub fn event_bus(&self) -> Arc<InMemoryEventBus> {
        self.shared.bus.clone()
    }
}

impl BrokerApi for Broker {
    fn declare_queue(&self, name: &str) -> bool {
        Broker::declare_queue(self, name)
    }

    fn publish(&self, queue: &str, payload: Bytes) -> Result<MessageId, BrokerError> {
        Broker::publish(self, queue, payload)
    }

    fn open_channel(&self) -> Channel {
        Broker::open_channel(self)
    }

    fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError> {
        Broker::queue_status(self, queue)
    }
}
