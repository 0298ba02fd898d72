//! # Unacked Registry
//!
//! Ordered record of a channel's delivered-but-unacknowledged messages.
//!
//! ## Data Structures
//!
//! - `entries`: `BTreeMap` keyed by delivery tag, so iteration is always in
//!   tag order and cumulative selection is a range scan.
//!
//! ## Invariants
//!
//! - Tags are strictly increasing in insertion order (checked in `record()`).
//! - Every entry has exactly one owner: a live consumer or the channel's
//!   basic-get owner.

use super::entities::{ChannelId, DeliveryOwner, DeliveryTag, QueueName, UnackedEntry};
use super::errors::BrokerError;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct UnackedRegistry {
    channel: ChannelId,
    entries: BTreeMap<DeliveryTag, UnackedEntry>,
}

impl UnackedRegistry {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            entries: BTreeMap::new(),
        }
    }

    /// Append an outstanding delivery.
    pub fn record(&mut self, entry: UnackedEntry) {
        debug_assert!(
            self.entries
                .last_key_value()
                .map_or(true, |(last, _)| *last < entry.delivery_tag),
            "delivery tag {} recorded out of order",
            entry.delivery_tag
        );
        self.entries.insert(entry.delivery_tag, entry);
    }

    /// Select and remove deliveries for an ack-like operation.
    ///
    /// Single: the entry for `tag`. Multiple: every entry of the same owner
    /// with a tag `<= tag`, in tag order. An unknown `tag` fails and leaves
    /// the registry unchanged.
    pub fn resolve(
        &mut self,
        tag: DeliveryTag,
        multiple: bool,
    ) -> Result<Vec<UnackedEntry>, BrokerError> {
        let selected = self.select(tag, multiple)?;
        Ok(selected
            .into_iter()
            .filter_map(|tag| self.entries.remove(&tag))
            .collect())
    }

    /// The tags [`UnackedRegistry::resolve`] would remove, without removing
    /// them.
    pub fn select(
        &self,
        tag: DeliveryTag,
        multiple: bool,
    ) -> Result<Vec<DeliveryTag>, BrokerError> {
        let Some(anchor) = self.entries.get(&tag) else {
            return Err(BrokerError::UnknownDeliveryTag {
                channel: self.channel,
                tag,
            });
        };

        if !multiple {
            return Ok(vec![tag]);
        }

        Ok(self
            .entries
            .range(..=tag)
            .filter(|(_, entry)| entry.owner == anchor.owner)
            .map(|(tag, _)| *tag)
            .collect())
    }

    /// Tags held by `owner`, or every tag when `owner` is `None`.
    pub fn owned_tags(&self, owner: Option<&DeliveryOwner>) -> Vec<DeliveryTag> {
        self.entries
            .iter()
            .filter(|(_, entry)| owner.map_or(true, |owner| entry.owner == *owner))
            .map(|(tag, _)| *tag)
            .collect()
    }

    /// Distinct origin queues of `tags`, sorted.
    pub fn origin_queues(&self, tags: &[DeliveryTag]) -> Vec<QueueName> {
        let mut queues: Vec<QueueName> = tags
            .iter()
            .filter_map(|tag| self.entries.get(tag))
            .map(|entry| entry.queue.clone())
            .collect();
        queues.sort();
        queues.dedup();
        queues
    }

    /// Remove a single delivery, if present.
    pub fn remove(&mut self, tag: DeliveryTag) -> Option<UnackedEntry> {
        self.entries.remove(&tag)
    }

    /// Remove every delivery held by `owner`, in tag order.
    pub fn drain_owner(&mut self, owner: &DeliveryOwner) -> Vec<UnackedEntry> {
        self.owned_tags(Some(owner))
            .into_iter()
            .filter_map(|tag| self.entries.remove(&tag))
            .collect()
    }

    /// Remove every delivery, in tag order.
    pub fn drain_all(&mut self) -> Vec<UnackedEntry> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn count_for(&self, owner: &DeliveryOwner) -> usize {
        self.entries.values().filter(|e| e.owner == *owner).count()
    }

    pub fn contains(&self, tag: DeliveryTag) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn tags(&self) -> Vec<DeliveryTag> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
