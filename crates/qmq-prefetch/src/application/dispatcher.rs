//! # Queue Dispatcher
//!
//! Per-queue state and the dispatch loop.
//!
//! ## Lock Order
//!
//! Queue lock first, then channel session locks. The dispatch loop holds
//! its queue lock and takes each candidate consumer's session lock in turn.
//! Requeueing settlements may hold several queue locks, always taken in
//! queue name order, before their session lock.
//!
//! ## Wakeups
//!
//! Dispatch runs when a message is published or requeued, when a consumer
//! is added, and when a consumer's credit is replenished. A pass that finds
//! ready messages but no consumer with credit simply returns: the queue
//! stays parked until one of those events happens.

use super::channel::ChannelCore;
use crate::domain::{
    BrokerError, ChannelId, ConsumerTag, Delivery, GetResponse, Message, QueueName, RoundRobin,
};
use crate::ports::MessageStore;
use parking_lot::Mutex;
use qmq_bus::{BrokerEvent, EventPublisher, RequeueReason};
use qmq_telemetry::{log_delivery_event, log_queue_event, metrics};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub(crate) type QueueHandle = Arc<Mutex<QueueState>>;

/// A consumer attached to a queue.
pub(crate) struct ConsumerSlot {
    pub(crate) channel: Arc<ChannelCore>,
    pub(crate) tag: ConsumerTag,
    pub(crate) auto_ack: bool,
    pub(crate) sender: mpsc::UnboundedSender<Delivery>,
}

impl ConsumerSlot {
    fn is(&self, channel: ChannelId, tag: &ConsumerTag) -> bool {
        self.channel.id == channel && self.tag == *tag
    }
}

/// What one dispatch call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Ready messages were left because no consumer had credit.
    pub blocked: bool,
    /// Consumers removed because their receiver was gone.
    pub reaped: usize,
}

/// One queue: ready messages plus the ring of consumers reading from it.
pub(crate) struct QueueState {
    name: QueueName,
    store: Box<dyn MessageStore>,
    consumers: Vec<ConsumerSlot>,
    cursor: RoundRobin,
}

impl QueueState {
    pub(crate) fn new(name: QueueName, store: Box<dyn MessageStore>) -> Self {
        Self {
            name,
            store,
            consumers: Vec::new(),
            cursor: RoundRobin::new(),
        }
    }

    pub(crate) fn ready(&self) -> usize {
        self.store.len()
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.store.push_back(message);
    }

    pub(crate) fn attach(&mut self, slot: ConsumerSlot) {
        self.consumers.push(slot);
    }

    /// Put messages back at the head in their original order, marked
    /// redelivered.
    pub(crate) fn requeue(
        &mut self,
        messages: Vec<Message>,
        reason: RequeueReason,
        events: &dyn EventPublisher,
    ) -> usize {
        let count = messages.len();
        if count == 0 {
            return 0;
        }
        for message in messages.into_iter().rev() {
            self.store.push_front(message.into_redelivered());
        }

        metrics::REQUEUED
            .with_label_values(&[reason.as_str()])
            .inc_by(count as f64);
        log_queue_event!(debug, self.name, "Messages requeued", count = count, reason = reason.as_str());
        events.publish(BrokerEvent::MessagesRequeued {
            queue: self.name.clone(),
            count,
            reason,
        });
        count
    }

    /// Detach a consumer, cancel it in its session and requeue everything
    /// it held. Does not dispatch.
    pub(crate) fn remove_consumer(
        &mut self,
        channel: &ChannelCore,
        tag: &ConsumerTag,
        reason: RequeueReason,
        events: &dyn EventPublisher,
    ) -> Result<usize, BrokerError> {
        if let Some(index) = self.consumers.iter().position(|s| s.is(channel.id, tag)) {
            self.consumers.remove(index);
            self.cursor.on_removed(index, self.consumers.len());
        }

        let cancelled = channel.session.lock().cancel_consumer(tag)?;
        metrics::CONSUMERS_ACTIVE.dec();
        metrics::UNACKED_MESSAGES.sub(cancelled.entries.len() as f64);

        let messages = cancelled.entries.into_iter().map(|e| e.message).collect();
        let requeued = self.requeue(messages, reason, events);

        info!(
            queue = %self.name,
            channel = %channel.id,
            consumer = %tag,
            requeued,
            reason = reason.as_str(),
            "Consumer cancelled"
        );
        events.publish(BrokerEvent::ConsumerCancelled {
            queue: self.name.clone(),
            channel: channel.id.0,
            consumer_tag: tag.to_string(),
            requeued,
        });
        Ok(requeued)
    }

    /// Pop one message for basic.get.
    pub(crate) fn get(
        &mut self,
        channel: &ChannelCore,
        auto_ack: bool,
    ) -> Result<Option<GetResponse>, BrokerError> {
        let mut session = channel.session.lock();
        session.ensure_open()?;
        let Some(message) = self.store.pop() else {
            return Ok(None);
        };

        let delivery_tag = session.accept_get(&self.name, &message, auto_ack);
        if !auto_ack {
            metrics::UNACKED_MESSAGES.inc();
        }
        log_delivery_event!(debug, "Message fetched", channel.id, delivery_tag, queue = %self.name, auto_ack = auto_ack);

        Ok(Some(GetResponse {
            delivery_tag,
            queue: self.name.clone(),
            message_id: message.id,
            payload: message.payload,
            redelivered: message.redelivered,
            message_count: self.store.len(),
        }))
    }

    /// Deliver ready messages to consumers with credit, round-robin, until
    /// the queue is empty or every consumer is blocked.
    pub(crate) fn dispatch(&mut self, events: &dyn EventPublisher) -> DispatchReport {
        let mut report = DispatchReport::default();
        loop {
            let gone = self.dispatch_pass(events, &mut report);
            if gone.is_empty() {
                break;
            }
            for (channel, tag) in gone {
                warn!(queue = %self.name, channel = %channel.id, consumer = %tag, "Consumer receiver dropped");
                if self
                    .remove_consumer(&channel, &tag, RequeueReason::Cancel, events)
                    .is_ok()
                {
                    report.reaped += 1;
                }
            }
        }

        if report.blocked {
            metrics::CREDIT_BLOCKED.inc();
            log_queue_event!(trace, self.name, "Dispatch parked without credit", ready = self.store.len());
        }
        report
    }

    /// One sweep. Returns consumers whose receiver has gone away.
    fn dispatch_pass(
        &mut self,
        events: &dyn EventPublisher,
        report: &mut DispatchReport,
    ) -> Vec<(Arc<ChannelCore>, ConsumerTag)> {
        let mut gone: Vec<(Arc<ChannelCore>, ConsumerTag)> = Vec::new();
        let len = self.consumers.len();

        'deliver: while !self.store.is_empty() {
            let mut delivered = false;
            let order: Vec<usize> = self.cursor.scan(len).collect();

            for index in order {
                let slot = &self.consumers[index];
                if gone.iter().any(|(c, t)| slot.is(c.id, t)) {
                    continue;
                }
                if slot.sender.is_closed() {
                    gone.push((slot.channel.clone(), slot.tag.clone()));
                    continue;
                }

                let mut session = slot.channel.session.lock();
                if !session.can_accept(&slot.tag) {
                    continue;
                }
                let Some(message) = self.store.pop() else {
                    break 'deliver;
                };

                let delivery = session.accept(&slot.tag, &self.name, message);
                let delivery_tag = delivery.delivery_tag;
                let redelivered = delivery.redelivered;

                if let Err(mpsc::error::SendError(delivery)) = slot.sender.send(delivery) {
                    session.withdraw(&delivery);
                    self.store.push_front(delivery.to_message());
                    gone.push((slot.channel.clone(), slot.tag.clone()));
                    continue;
                }

                let ack_mode = if slot.auto_ack { "auto" } else { "manual" };
                metrics::DELIVERIES.with_label_values(&[ack_mode]).inc();
                if !slot.auto_ack {
                    metrics::UNACKED_MESSAGES.inc();
                }
                log_delivery_event!(
                    debug,
                    "Message delivered",
                    slot.channel.id,
                    delivery_tag,
                    queue = %self.name,
                    consumer = %slot.tag,
                    redelivered = redelivered
                );
                events.publish(BrokerEvent::MessageDelivered {
                    queue: self.name.clone(),
                    channel: slot.channel.id.0,
                    consumer_tag: slot.tag.to_string(),
                    delivery_tag: delivery_tag.0,
                    redelivered,
                });

                report.delivered += 1;
                self.cursor.advance_past(index, len);
                delivered = true;
                break;
            }

            if !delivered {
                report.blocked = len > gone.len() && !self.store.is_empty();
                break;
            }
        }
        gone
    }
}
