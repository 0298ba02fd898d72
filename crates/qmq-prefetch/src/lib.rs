//! # Prefetch Subsystem
//!
//! Per-consumer prefetch (credit) control for a queue broker: how many
//! unacknowledged deliveries a consumer may hold, when a queue may push it
//! another message, and what happens to outstanding deliveries on ack,
//! nack, recover, cancel and channel close.
//!
//! ## Purpose
//!
//! A consumer that registers with `x-prefetch = N` never holds more than
//! `N` unacknowledged deliveries. Acknowledging frees credit and wakes the
//! queue. `0` means unlimited; auto-ack consumers are never limited.
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | outstanding ≤ limit for every limited manual-ack consumer | `domain/credit.rs` - `has_credit()` gate before `charge()` |
//! | outstanding equals the consumer's unacked entry count | `domain/session.rs` - `accept()` / `release_entries()` |
//! | Delivery tags strictly increase per channel, starting at 1 | `domain/session.rs` - `next_tag` |
//! | Each tag settles at most once | `domain/unacked.rs` - `resolve()` removes entries |
//! | Failed ack changes nothing | `domain/unacked.rs` - lookup before removal |
//! | Requeued messages keep order and are flagged redelivered | `application/dispatcher.rs` - `requeue()` |
//! | A zero-credit consumer is never offered a message | `application/dispatcher.rs` - `dispatch_pass()` |
//!
//! ## Delivery Lifecycle
//!
//! ```text
//! [READY] ──dispatch──→ [OUTSTANDING] ──ack──→ [SETTLED]
//!    ↑                        │
//!    │                        ├── nack(requeue=false) ──→ [DEAD-LETTERED]
//!    └── nack / recover / cancel / close ─┘
//! ```
//!
//! ## Lock Order
//!
//! Queue state before channel session, never the reverse. Ack and
//! dead-lettering nack settle under the session lock alone. Requeueing nack
//! and recover lock their origin queues first (in name order), settle under
//! the session lock, and push the messages back before any queue lock is
//! released.
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  ipc/         - ChannelCommand handler for protocol front ends  │
//! │  adapters/    - In-memory store, dead-letter sinks              │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  application/ - Broker, Channel, Consumer, queue dispatcher     │
//! │  ports/       - BrokerApi, ChannelApi, MessageStore, sinks      │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/credit.rs   - CreditController                          │
//! │  domain/unacked.rs  - UnackedRegistry                           │
//! │  domain/session.rs  - ChannelSession                            │
//! │  domain/fairness.rs - RoundRobin                                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let broker = Broker::new(BrokerConfig::default())?;
//! broker.declare_queue("jobs");
//! let channel = broker.open_channel();
//! let mut consumer = channel.consume("jobs", ConsumeOptions::new().prefetch(2u32))?;
//! broker.publish("jobs", "work")?;
//! let delivery = consumer.recv().await.unwrap();
//! channel.ack(delivery.delivery_tag, false)?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ipc;
pub mod ports;

pub use adapters::*;
pub use application::*;
pub use config::{BrokerConfig, ConfigError, DEFAULT_PREFETCH_ARGUMENT};
pub use domain::*;
pub use ipc::*;
pub use ports::*;
