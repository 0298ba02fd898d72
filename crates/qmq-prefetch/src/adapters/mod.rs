//! Adapters for the outbound ports.

pub mod dead_letter;
pub mod memory_store;

pub use dead_letter::{BusDeadLetterSink, DiscardDeadLetters};
pub use memory_store::InMemoryMessageStore;
