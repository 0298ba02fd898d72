//! Outbound (Driven) ports for the prefetch subsystem.
//!
//! Queue storage and dead lettering live outside the core. The dispatcher
//! only needs FIFO access with a way to put messages back at the head.

use crate::domain::{Message, QueueName};

/// Ready-message storage for one queue.
///
/// Called with the queue lock held; implementations must not block.
pub trait MessageStore: Send {
    /// Remove and return the message at the head.
    fn pop(&mut self) -> Option<Message>;

    /// Put a message back at the head, ahead of everything else.
    fn push_front(&mut self, message: Message);

    /// Append a newly published message.
    fn push_back(&mut self, message: Message);

    /// Number of ready messages.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Destination for messages rejected with `requeue = false`.
pub trait DeadLetterSink: Send + Sync {
    /// Take ownership of a message removed from `queue`.
    fn dead_letter(&self, queue: &QueueName, message: Message);
}
