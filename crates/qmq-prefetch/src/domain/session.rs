//! # Channel Session
//!
//! Everything a channel owns that the dispatch and acknowledgement paths
//! mutate together: the delivery tag counter, consumer credit states and
//! the unacked set. One session lives behind one lock, so a credit charge
//! and the matching unacked record (or a settle and the matching release)
//! are always observed as a unit.

use super::credit::{CreditController, CreditTransition};
use super::entities::{
    ChannelId, ConsumerTag, Delivery, DeliveryOwner, DeliveryTag, Message, QueueName,
    UnackedEntry,
};
use super::errors::BrokerError;
use super::unacked::UnackedRegistry;
use super::value_objects::{ChannelStatus, ConsumerStatus, Prefetch};
use std::collections::HashMap;

/// Result of settling one or more deliveries.
#[derive(Debug, Default)]
pub struct SettleOutcome {
    /// Settled entries in ascending tag order.
    pub entries: Vec<UnackedEntry>,
    /// Consumers whose credit went from exhausted to available, with the
    /// queue each one consumes from.
    pub replenished: Vec<(ConsumerTag, QueueName)>,
}

impl SettleOutcome {
    pub fn tags(&self) -> Vec<DeliveryTag> {
        self.entries.iter().map(|e| e.delivery_tag).collect()
    }
}

/// A consumer removed from its session.
#[derive(Debug)]
pub struct CancelledConsumer {
    pub tag: ConsumerTag,
    pub queue: QueueName,
    /// Its outstanding deliveries in ascending tag order.
    pub entries: Vec<UnackedEntry>,
}

#[derive(Debug, Clone)]
struct ConsumerBinding {
    queue: QueueName,
}

#[derive(Debug)]
pub struct ChannelSession {
    id: ChannelId,
    open: bool,
    next_tag: u64,
    generated_tags: u64,
    credits: CreditController,
    unacked: UnackedRegistry,
    consumers: HashMap<ConsumerTag, ConsumerBinding>,
}

impl ChannelSession {
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            open: true,
            next_tag: 1,
            generated_tags: 0,
            credits: CreditController::new(),
            unacked: UnackedRegistry::new(id),
            consumers: HashMap::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed(self.id))
        }
    }

    /// A fresh server-generated consumer tag, never one in use.
    pub fn generate_tag(&mut self, prefix: &str) -> ConsumerTag {
        loop {
            self.generated_tags += 1;
            let tag = ConsumerTag::new(format!("{prefix}{}", self.generated_tags));
            if !self.consumers.contains_key(&tag) {
                return tag;
            }
        }
    }

    /// Register a consumer with an already validated prefetch.
    pub fn register_consumer(
        &mut self,
        tag: ConsumerTag,
        queue: QueueName,
        prefetch: Prefetch,
        auto_ack: bool,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.consumers.contains_key(&tag) {
            return Err(BrokerError::ConsumerTagInUse {
                channel: self.id,
                tag,
            });
        }
        self.credits.register(tag.clone(), prefetch, auto_ack);
        self.consumers.insert(tag, ConsumerBinding { queue });
        Ok(())
    }

    pub fn has_consumer(&self, tag: &ConsumerTag) -> bool {
        self.consumers.contains_key(tag)
    }

    /// Change a consumer's prefetch limit.
    pub fn set_limit(
        &mut self,
        tag: &ConsumerTag,
        prefetch: Prefetch,
    ) -> Result<(CreditTransition, QueueName), BrokerError> {
        self.ensure_open()?;
        let queue = self.consumer_queue(tag)?;
        let transition = self
            .credits
            .set_limit(tag, prefetch)
            .unwrap_or(CreditTransition::Unchanged);
        Ok((transition, queue))
    }

    /// Whether the dispatcher may hand `tag` another message right now.
    pub fn can_accept(&self, tag: &ConsumerTag) -> bool {
        self.open && self.consumers.contains_key(tag) && self.credits.has_credit(tag)
    }

    /// Turn a popped message into a delivery for `tag`.
    ///
    /// Assigns the next tag and, unless the consumer is auto-ack, charges
    /// one credit and records the delivery. Callers check
    /// [`ChannelSession::can_accept`] first under the same lock.
    pub fn accept(&mut self, tag: &ConsumerTag, queue: &str, message: Message) -> Delivery {
        debug_assert!(self.can_accept(tag));
        let delivery_tag = self.next_delivery_tag();
        let auto_ack = self.credits.state(tag).is_some_and(|s| s.auto_ack());

        let delivery = Delivery {
            consumer_tag: tag.clone(),
            delivery_tag,
            queue: queue.to_string(),
            message_id: message.id,
            payload: message.payload.clone(),
            redelivered: message.redelivered,
        };

        if !auto_ack {
            self.credits.charge(tag);
            self.unacked.record(UnackedEntry {
                delivery_tag,
                owner: DeliveryOwner::Consumer(tag.clone()),
                queue: queue.to_string(),
                message,
            });
        }
        delivery
    }

    /// Record a basic.get. No credit is involved.
    pub fn accept_get(&mut self, queue: &str, message: &Message, auto_ack: bool) -> DeliveryTag {
        let delivery_tag = self.next_delivery_tag();
        if !auto_ack {
            self.unacked.record(UnackedEntry {
                delivery_tag,
                owner: DeliveryOwner::Get,
                queue: queue.to_string(),
                message: message.clone(),
            });
        }
        delivery_tag
    }

    /// Undo [`ChannelSession::accept`] for a delivery that never reached
    /// its consumer.
    pub fn withdraw(&mut self, delivery: &Delivery) {
        if self.unacked.remove(delivery.delivery_tag).is_some() {
            self.credits.release(&delivery.consumer_tag, 1);
        }
    }

    /// Origin queues of what [`ChannelSession::resolve`] would select.
    ///
    /// Requeueing settlements lock these queues before resolving, so the
    /// released credit only becomes visible to dispatchers once the
    /// messages are back at the head.
    pub fn resolve_queues(
        &self,
        tag: DeliveryTag,
        multiple: bool,
    ) -> Result<Vec<QueueName>, BrokerError> {
        self.ensure_open()?;
        let tags = self.unacked.select(tag, multiple)?;
        Ok(self.unacked.origin_queues(&tags))
    }

    /// Origin queues of what a recover would take: one consumer's
    /// deliveries, or the whole channel's with `None`.
    pub fn recover_queues(
        &self,
        consumer: Option<&ConsumerTag>,
    ) -> Result<Vec<QueueName>, BrokerError> {
        self.ensure_open()?;
        let owner = match consumer {
            Some(tag) => {
                self.consumer_queue(tag)?;
                Some(DeliveryOwner::Consumer(tag.clone()))
            }
            None => None,
        };
        let tags = self.unacked.owned_tags(owner.as_ref());
        Ok(self.unacked.origin_queues(&tags))
    }

    /// Remove the delivery `tag` (and, with `multiple`, every earlier
    /// delivery of the same owner) and release their credit. Shared by ack,
    /// nack and reject; what happens to the messages is up to the caller.
    pub fn resolve(
        &mut self,
        tag: DeliveryTag,
        multiple: bool,
    ) -> Result<SettleOutcome, BrokerError> {
        self.ensure_open()?;
        let entries = self.unacked.resolve(tag, multiple)?;
        Ok(self.release_entries(entries))
    }

    /// Recover every outstanding delivery on the channel, basic.get ones
    /// included.
    pub fn recover_all(&mut self) -> Result<SettleOutcome, BrokerError> {
        self.ensure_open()?;
        let entries = self.unacked.drain_all();
        Ok(self.release_entries(entries))
    }

    /// Recover every outstanding delivery of one consumer.
    pub fn recover_consumer(&mut self, tag: &ConsumerTag) -> Result<SettleOutcome, BrokerError> {
        self.ensure_open()?;
        self.consumer_queue(tag)?;
        let entries = self
            .unacked
            .drain_owner(&DeliveryOwner::Consumer(tag.clone()));
        Ok(self.release_entries(entries))
    }

    /// Remove a consumer and hand back its outstanding deliveries.
    ///
    /// Works on a closed channel so that close can cancel its consumers.
    pub fn cancel_consumer(&mut self, tag: &ConsumerTag) -> Result<CancelledConsumer, BrokerError> {
        let binding = self
            .consumers
            .remove(tag)
            .ok_or_else(|| BrokerError::ConsumerNotFound {
                channel: self.id,
                tag: tag.clone(),
            })?;
        self.credits.remove(tag);
        let entries = self
            .unacked
            .drain_owner(&DeliveryOwner::Consumer(tag.clone()));
        Ok(CancelledConsumer {
            tag: tag.clone(),
            queue: binding.queue,
            entries,
        })
    }

    /// Stop accepting deliveries and commands.
    ///
    /// Returns the live consumers, which the caller cancels one by one.
    /// Returns `None` if the channel was already closed.
    pub fn close(&mut self) -> Option<Vec<(ConsumerTag, QueueName)>> {
        if !self.open {
            return None;
        }
        self.open = false;
        let mut consumers: Vec<(ConsumerTag, QueueName)> = self
            .consumers
            .iter()
            .map(|(tag, binding)| (tag.clone(), binding.queue.clone()))
            .collect();
        consumers.sort();
        Some(consumers)
    }

    /// Remove whatever is left in the unacked set. Used by close after
    /// every consumer has been cancelled.
    pub fn drain_unacked(&mut self) -> Vec<UnackedEntry> {
        self.unacked.drain_all()
    }

    pub fn consumer_status(&self, tag: &ConsumerTag) -> Option<ConsumerStatus> {
        let binding = self.consumers.get(tag)?;
        let state = self.credits.state(tag)?;
        Some(ConsumerStatus {
            consumer_tag: tag.clone(),
            queue: binding.queue.clone(),
            limit: state.limit().limit(),
            outstanding: state.outstanding(),
            auto_ack: state.auto_ack(),
        })
    }

    pub fn status(&self) -> ChannelStatus {
        let mut consumers: Vec<ConsumerStatus> = self
            .consumers
            .keys()
            .filter_map(|tag| self.consumer_status(tag))
            .collect();
        consumers.sort_by(|a, b| a.consumer_tag.cmp(&b.consumer_tag));
        ChannelStatus {
            open: self.open,
            unacked: self.unacked.len(),
            next_delivery_tag: DeliveryTag(self.next_tag),
            consumers,
        }
    }

    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    fn next_delivery_tag(&mut self) -> DeliveryTag {
        let tag = DeliveryTag(self.next_tag);
        self.next_tag += 1;
        tag
    }

    pub fn consumer_queue(&self, tag: &ConsumerTag) -> Result<QueueName, BrokerError> {
        self.consumers
            .get(tag)
            .map(|binding| binding.queue.clone())
            .ok_or_else(|| BrokerError::ConsumerNotFound {
                channel: self.id,
                tag: tag.clone(),
            })
    }

    /// Release one credit per consumer-owned entry and collect replenish
    /// edges. Get-owned entries carry no credit.
    fn release_entries(&mut self, entries: Vec<UnackedEntry>) -> SettleOutcome {
        let mut per_consumer: Vec<(ConsumerTag, u32)> = Vec::new();
        for entry in &entries {
            let Some(tag) = entry.owner.consumer() else {
                continue;
            };
            match per_consumer.iter_mut().find(|(t, _)| t == tag) {
                Some((_, n)) => *n += 1,
                None => per_consumer.push((tag.clone(), 1)),
            }
        }

        let mut replenished = Vec::new();
        for (tag, n) in per_consumer {
            if self.credits.release(&tag, n) == CreditTransition::Replenished {
                if let Some(binding) = self.consumers.get(&tag) {
                    replenished.push((tag, binding.queue.clone()));
                }
            }
        }

        SettleOutcome {
            entries,
            replenished,
        }
    }
}
