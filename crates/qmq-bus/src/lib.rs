//! # QMQ Bus - Broker Event Bus
//!
//! Carries observations out of the broker core: publishes, deliveries,
//! settlements, requeues, dead letters and consumer lifecycle changes.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Dispatcher / │                    │ Protocol,    │
//! │ Ack path     │    publish()       │ audit, tests │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! Publishing is synchronous and never blocks; lagging subscribers lose the
//! oldest events instead of slowing delivery down.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{BrokerEvent, EventFilter, EventTopic, RequeueReason, SettleKind};
pub use publisher::{EventPublisher, InMemoryEventBus, NoOpPublisher};
pub use subscriber::{EventStream, EventSubscriber, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Topic name used when dead-lettered messages are forwarded elsewhere.
pub const DLQ_TOPIC: &str = "dlq.rejected";
