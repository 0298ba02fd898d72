//! # Broker Events
//!
//! Defines all event types that flow through the bus. Events describe what
//! the dispatch and acknowledgement paths did; they are observations, never
//! commands, so dropping them never changes broker state.

use serde::{Deserialize, Serialize};

/// Why a batch of messages went back to the head of its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequeueReason {
    /// Negative acknowledgement with `requeue = true`.
    Nack,
    /// `basic.recover` on the channel or a single consumer.
    Recover,
    /// Consumer cancelled or its receiver went away.
    Cancel,
    /// The owning channel was closed.
    ChannelClosed,
}

impl RequeueReason {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nack => "nack",
            Self::Recover => "recover",
            Self::Cancel => "cancel",
            Self::ChannelClosed => "close",
        }
    }
}

/// How a batch of deliveries was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettleKind {
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement.
    Nack {
        /// Whether the messages were requeued.
        requeue: bool,
    },
    /// Recovered for redelivery.
    Recover,
}

/// All events that can be published to the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrokerEvent {
    // =========================================================================
    // QUEUE
    // =========================================================================
    /// A message became ready on a queue.
    MessagePublished {
        /// Target queue.
        queue: String,
        /// Broker-assigned message id.
        message_id: u64,
    },

    /// Messages were returned to the head of a queue.
    MessagesRequeued {
        /// Origin queue.
        queue: String,
        /// Number of messages requeued.
        count: usize,
        /// What caused the requeue.
        reason: RequeueReason,
    },

    // =========================================================================
    // DISPATCH
    // =========================================================================
    /// A message was handed to a consumer.
    MessageDelivered {
        /// Origin queue.
        queue: String,
        /// Channel carrying the delivery.
        channel: u64,
        /// Receiving consumer.
        consumer_tag: String,
        /// Channel-scoped delivery tag.
        delivery_tag: u64,
        /// Whether the message was delivered before.
        redelivered: bool,
    },

    // =========================================================================
    // ACKNOWLEDGEMENT
    // =========================================================================
    /// One or more deliveries left the unacked set.
    DeliveriesSettled {
        /// Channel the deliveries belonged to.
        channel: u64,
        /// How they were settled.
        kind: SettleKind,
        /// Settled delivery tags in ascending order.
        delivery_tags: Vec<u64>,
    },

    /// A message was rejected without requeue.
    MessageDeadLettered {
        /// Origin queue.
        queue: String,
        /// Broker-assigned message id.
        message_id: u64,
        /// Message body.
        payload: Vec<u8>,
    },

    // =========================================================================
    // CONSUMER LIFECYCLE
    // =========================================================================
    /// A consumer was registered on a queue.
    ConsumerRegistered {
        /// Queue consumed from.
        queue: String,
        /// Owning channel.
        channel: u64,
        /// Consumer tag.
        consumer_tag: String,
        /// Prefetch limit (0 = unlimited).
        prefetch: u32,
        /// Whether deliveries are acknowledged on hand-off.
        auto_ack: bool,
    },

    /// A consumer was cancelled or disconnected.
    ConsumerCancelled {
        /// Queue consumed from.
        queue: String,
        /// Owning channel.
        channel: u64,
        /// Consumer tag.
        consumer_tag: String,
        /// Outstanding deliveries returned to the queue.
        requeued: usize,
    },

    /// A channel stopped accepting commands.
    ChannelClosed {
        /// Closed channel.
        channel: u64,
        /// AMQP reply code (200 for a clean close).
        reply_code: u16,
    },
}

impl BrokerEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::MessagePublished { .. } | Self::MessagesRequeued { .. } => EventTopic::Queue,
            Self::MessageDelivered { .. } => EventTopic::Delivery,
            Self::DeliveriesSettled { .. } => EventTopic::Acknowledgement,
            Self::MessageDeadLettered { .. } => EventTopic::DeadLetter,
            Self::ConsumerRegistered { .. }
            | Self::ConsumerCancelled { .. }
            | Self::ChannelClosed { .. } => EventTopic::Consumer,
        }
    }

    /// Get the queue this event concerns, if any.
    #[must_use]
    pub fn queue(&self) -> Option<&str> {
        match self {
            Self::MessagePublished { queue, .. }
            | Self::MessagesRequeued { queue, .. }
            | Self::MessageDelivered { queue, .. }
            | Self::MessageDeadLettered { queue, .. }
            | Self::ConsumerRegistered { queue, .. }
            | Self::ConsumerCancelled { queue, .. } => Some(queue),
            Self::DeliveriesSettled { .. } | Self::ChannelClosed { .. } => None,
        }
    }

    /// Get the channel this event concerns, if any.
    #[must_use]
    pub fn channel(&self) -> Option<u64> {
        match self {
            Self::MessageDelivered { channel, .. }
            | Self::DeliveriesSettled { channel, .. }
            | Self::ConsumerRegistered { channel, .. }
            | Self::ConsumerCancelled { channel, .. }
            | Self::ChannelClosed { channel, .. } => Some(*channel),
            Self::MessagePublished { .. }
            | Self::MessagesRequeued { .. }
            | Self::MessageDeadLettered { .. } => None,
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Publish and requeue events.
    Queue,
    /// Deliveries to consumers.
    Delivery,
    /// Ack / nack / recover settlements.
    Acknowledgement,
    /// Messages rejected without requeue.
    DeadLetter,
    /// Consumer and channel lifecycle.
    Consumer,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Queues to include. Empty means all queues; events without a queue
    /// only pass an empty queue filter.
    pub queues: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            queues: Vec::new(),
        }
    }

    /// Create a filter for events about specific queues.
    #[must_use]
    pub fn queues(queues: Vec<String>) -> Self {
        Self {
            topics: Vec::new(),
            queues,
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &BrokerEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let queue_match = self.queues.is_empty()
            || event
                .queue()
                .is_some_and(|queue| self.queues.iter().any(|q| q == queue));

        topic_match && queue_match
    }
}
