//! In-memory queue storage.

use crate::domain::Message;
use crate::ports::MessageStore;
use std::collections::VecDeque;

/// `VecDeque`-backed [`MessageStore`]. No persistence.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: VecDeque<Message>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    fn push_front(&mut self, message: Message) {
        self.messages.push_front(message);
    }

    fn push_back(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}
