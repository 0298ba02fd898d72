//! # Domain Layer - Prefetch Subsystem
//!
//! Pure bookkeeping with no locking and no I/O.
//!
//! ## Components
//!
//! - `entities`: identifiers, Message, Delivery, UnackedEntry
//! - `credit`: CreditController (prefetch limit vs outstanding count)
//! - `unacked`: UnackedRegistry (ordered outstanding deliveries)
//! - `session`: ChannelSession (credit + unacked + tag counter as one unit)
//! - `fairness`: RoundRobin cursor for consumer selection
//! - `value_objects`: FieldTable, Prefetch, Settlement, status snapshots
//! - `errors`: BrokerError and its classification

pub mod credit;
pub mod entities;
pub mod errors;
pub mod fairness;
pub mod session;
pub mod unacked;
pub mod value_objects;

pub use credit::*;
pub use entities::*;
pub use errors::*;
pub use fairness::*;
pub use session::*;
pub use unacked::*;
pub use value_objects::*;
