//! Round-robin selection among a queue's consumers.

/// Cursor over a ring of consumers.
///
/// `next` is the index the following scan starts from. After a delivery
/// the cursor moves just past the consumer that received it, so consumers
/// with credit take turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundRobin {
    next: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indices of a ring of `len` consumers in scan order.
    pub fn scan(&self, len: usize) -> impl Iterator<Item = usize> {
        let start = if len == 0 { 0 } else { self.next % len };
        (0..len).map(move |offset| (start + offset) % len)
    }

    /// Record a delivery to `index`.
    pub fn advance_past(&mut self, index: usize, len: usize) {
        self.next = if len == 0 { 0 } else { (index + 1) % len };
    }

    /// Keep the cursor on the same consumer after `index` left the ring.
    pub fn on_removed(&mut self, index: usize, len_after: usize) {
        if index < self.next {
            self.next -= 1;
        }
        if len_after == 0 || self.next >= len_after {
            self.next = 0;
        }
    }
}
