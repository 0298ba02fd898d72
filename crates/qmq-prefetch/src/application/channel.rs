//! # Channels and Consumers
//!
//! A [`Channel`] is the acknowledgement processor for one client channel:
//! it registers consumers, settles deliveries and recovers them. A
//! [`Consumer`] is the receiving end of one consumer's delivery stream.
//!
//! ## Settlement
//!
//! Ack, nack and reject select entries through the session's `resolve`
//! routine; recover drains a consumer or the whole channel. What happens
//! next depends only on the [`Settlement`] variant:
//!
//! | Settlement | Messages | Credit |
//! |------------|----------|--------|
//! | `Ack` | dropped | released |
//! | `Nack { requeue: true }` / `Recover` | head of origin queue, redelivered | released |
//! | `Nack { requeue: false }` | dead-letter sink | released |
//!
//! Settlements that requeue hold the origin queue locks across the whole
//! operation, so a dispatcher never sees the freed credit before the
//! messages are back at the head of their queue.

use super::broker::BrokerShared;
use super::dispatcher::{ConsumerSlot, QueueHandle, QueueState};
use crate::domain::{
    BrokerError, ChannelId, ChannelSession, ChannelStatus, ConsumeOptions, ConsumerTag,
    CreditTransition, Delivery, DeliveryTag, FieldValue, GetResponse, Message, Prefetch,
    QueueName, SettleOutcome, Settlement, UnackedEntry,
};
use crate::ports::ChannelApi;
use parking_lot::{Mutex, MutexGuard};
use qmq_bus::{BrokerEvent, RequeueReason};
use qmq_telemetry::{log_delivery_event, metrics};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Reply code for a clean close.
pub const REPLY_SUCCESS: u16 = 200;

/// The lockable part of a channel, shared with queue consumer slots.
pub(crate) struct ChannelCore {
    pub(crate) id: ChannelId,
    pub(crate) session: Mutex<ChannelSession>,
}

impl ChannelCore {
    pub(crate) fn new(id: ChannelId) -> Self {
        Self {
            id,
            session: Mutex::new(ChannelSession::new(id)),
        }
    }
}

/// A client channel. Closing (or dropping) it cancels every consumer and
/// requeues everything outstanding.
pub struct Channel {
    core: Arc<ChannelCore>,
    broker: Arc<BrokerShared>,
}

impl Channel {
    pub(crate) fn new(core: Arc<ChannelCore>, broker: Arc<BrokerShared>) -> Self {
        Self { core, broker }
    }

    pub fn id(&self) -> ChannelId {
        self.core.id
    }

    pub fn is_open(&self) -> bool {
        self.core.session.lock().is_open()
    }

    /// Register a consumer on `queue`.
    ///
    /// The prefetch argument is validated before anything is registered;
    /// a rejected request leaves no trace on the channel or the queue.
    pub fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Consumer, BrokerError> {
        let result = self.register_consumer(queue, options);
        if let Err(err) = &result {
            metrics::CONSUME_REJECTED
                .with_label_values(&[err.metric_label()])
                .inc();
            warn!(channel = %self.core.id, queue, error = %err, "Consume rejected");
        }
        result
    }

    fn register_consumer(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Consumer, BrokerError> {
        let config = &self.broker.config;
        self.core.session.lock().ensure_open()?;
        let prefetch = Prefetch::from_arguments(&options.arguments, config)?;
        let handle = self.broker.queue(queue)?;

        let mut state = handle.lock();
        let tag = {
            let mut session = self.core.session.lock();
            let tag = if options.consumer_tag.is_empty() {
                session.generate_tag(&config.consumer_tag_prefix)
            } else {
                ConsumerTag::new(options.consumer_tag)
            };
            session.register_consumer(tag.clone(), queue.to_string(), prefetch, options.auto_ack)?;
            tag
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        state.attach(ConsumerSlot {
            channel: self.core.clone(),
            tag: tag.clone(),
            auto_ack: options.auto_ack,
            sender,
        });
        metrics::CONSUMERS_ACTIVE.inc();

        info!(
            channel = %self.core.id,
            queue,
            consumer = %tag,
            prefetch = prefetch.limit(),
            auto_ack = options.auto_ack,
            "Consumer registered"
        );
        self.broker.events().publish(BrokerEvent::ConsumerRegistered {
            queue: queue.to_string(),
            channel: self.core.id.0,
            consumer_tag: tag.to_string(),
            prefetch: prefetch.limit(),
            auto_ack: options.auto_ack,
        });

        let consumer = Consumer {
            tag,
            queue: queue.to_string(),
            receiver,
            core: self.core.clone(),
            broker: self.broker.clone(),
        };
        state.dispatch(self.broker.events());
        Ok(consumer)
    }

    /// Change a consumer's prefetch limit. Raising it may deliver at once.
    pub fn set_prefetch(
        &self,
        consumer_tag: &ConsumerTag,
        limit: &FieldValue,
    ) -> Result<(), BrokerError> {
        let prefetch = Prefetch::from_field(limit, &self.broker.config)?;
        let (transition, queue) = self.core.session.lock().set_limit(consumer_tag, prefetch)?;
        debug!(channel = %self.core.id, consumer = %consumer_tag, prefetch = prefetch.limit(), "Prefetch changed");
        if transition == CreditTransition::Replenished {
            self.broker.dispatch(&queue);
        }
        Ok(())
    }

    /// Cancel a consumer; its outstanding deliveries go back to the queue.
    pub fn cancel(&self, consumer_tag: &ConsumerTag) -> Result<usize, BrokerError> {
        self.core.session.lock().ensure_open()?;
        cancel_consumer(&self.broker, &self.core, consumer_tag, RequeueReason::Cancel)
    }

    /// Acknowledge `tag`, or with `multiple` every delivery of the same
    /// owner up to and including it. Returns the number settled.
    pub fn ack(&self, tag: DeliveryTag, multiple: bool) -> Result<usize, BrokerError> {
        self.settle(Settlement::Ack, tag, multiple)
    }

    pub fn nack(
        &self,
        tag: DeliveryTag,
        multiple: bool,
        requeue: bool,
    ) -> Result<usize, BrokerError> {
        let settlement = Settlement::Nack { requeue };
        if !settlement.requeues() {
            return self.settle(settlement, tag, multiple);
        }
        self.settle_requeued(
            settlement,
            RequeueReason::Nack,
            |session| session.resolve_queues(tag, multiple),
            |session| session.resolve(tag, multiple),
        )
        .map_err(|err| self.rejected(tag, multiple, err))
    }

    /// Single-delivery nack.
    pub fn reject(&self, tag: DeliveryTag, requeue: bool) -> Result<usize, BrokerError> {
        self.nack(tag, false, requeue)
    }

    /// Requeue every outstanding delivery on the channel, basic.get ones
    /// included. Returns the number requeued.
    pub fn recover(&self) -> Result<usize, BrokerError> {
        self.settle_requeued(
            Settlement::Recover,
            RequeueReason::Recover,
            |session| session.recover_queues(None),
            ChannelSession::recover_all,
        )
    }

    /// Requeue every outstanding delivery of one consumer.
    pub fn recover_consumer(&self, consumer_tag: &ConsumerTag) -> Result<usize, BrokerError> {
        self.settle_requeued(
            Settlement::Recover,
            RequeueReason::Recover,
            |session| session.recover_queues(Some(consumer_tag)),
            |session| session.recover_consumer(consumer_tag),
        )
    }

    /// Fetch one message outside of any consumer.
    pub fn get(&self, queue: &str, auto_ack: bool) -> Result<Option<GetResponse>, BrokerError> {
        let handle = self.broker.queue(queue)?;
        let mut state = handle.lock();
        state.get(&self.core, auto_ack)
    }

    /// Close the channel. Returns the number of messages requeued.
    pub fn close(&self) -> usize {
        self.close_with(REPLY_SUCCESS)
    }

    /// Close with an AMQP reply code; non-200 codes mark a channel
    /// exception.
    pub fn close_with(&self, reply_code: u16) -> usize {
        let consumers = self.core.session.lock().close();
        let Some(consumers) = consumers else {
            return 0;
        };

        let mut requeued = 0;
        for (tag, _) in consumers {
            match cancel_consumer(&self.broker, &self.core, &tag, RequeueReason::ChannelClosed) {
                Ok(n) => requeued += n,
                Err(err) => trace!(consumer = %tag, error = %err, "Consumer already gone"),
            }
        }

        // Whatever is left belongs to basic.get
        let leftovers = self.core.session.lock().drain_unacked();
        metrics::UNACKED_MESSAGES.sub(leftovers.len() as f64);
        requeued += self.requeue(leftovers, RequeueReason::ChannelClosed);

        info!(channel = %self.core.id, reply_code, requeued, "Channel closed");
        self.broker.events().publish(BrokerEvent::ChannelClosed {
            channel: self.core.id.0,
            reply_code,
        });
        requeued
    }

    pub fn status(&self) -> ChannelStatus {
        self.core.session.lock().status()
    }

    /// Ack and dead-lettering nack: nothing goes back to a queue, so the
    /// session lock alone is enough.
    fn settle(
        &self,
        settlement: Settlement,
        tag: DeliveryTag,
        multiple: bool,
    ) -> Result<usize, BrokerError> {
        let outcome = self
            .core
            .session
            .lock()
            .resolve(tag, multiple)
            .map_err(|err| self.rejected(tag, multiple, err))?;

        let SettleOutcome {
            entries,
            replenished,
        } = outcome;
        let count = self.record_settlement(settlement, &entries);
        if matches!(settlement, Settlement::Nack { requeue: false }) {
            for entry in entries {
                self.broker.dead_letters.dead_letter(&entry.queue, entry.message);
            }
        }

        let mut dispatched: Vec<QueueName> = Vec::new();
        for (_, queue) in replenished {
            if !dispatched.contains(&queue) {
                self.broker.dispatch(&queue);
                dispatched.push(queue);
            }
        }
        Ok(count)
    }

    /// Nack with requeue and recover.
    ///
    /// The origin queues are locked (in name order) before the session, and
    /// stay locked until the messages are back at their head. Credit
    /// released by the settlement is therefore never seen by a dispatcher
    /// while the messages are in neither the unacked set nor the queue.
    /// If the selection moves to another queue between the lookup and the
    /// locks, the attempt is retried.
    fn settle_requeued(
        &self,
        settlement: Settlement,
        reason: RequeueReason,
        queues_of: impl Fn(&ChannelSession) -> Result<Vec<QueueName>, BrokerError>,
        take: impl FnOnce(&mut ChannelSession) -> Result<SettleOutcome, BrokerError>,
    ) -> Result<usize, BrokerError> {
        let events = self.broker.events();
        let expected = queues_of(&self.core.session.lock())?;
        let handles: Vec<QueueHandle> = expected
            .iter()
            .map(|queue| self.broker.queue(queue))
            .collect::<Result<_, _>>()?;
        let mut states: Vec<MutexGuard<'_, QueueState>> =
            handles.iter().map(|handle| handle.lock()).collect();

        let outcome = {
            let mut session = self.core.session.lock();
            if queues_of(&session)? != expected {
                drop(session);
                drop(states);
                trace!(channel = %self.core.id, "Settlement moved queues, retrying");
                return self.settle_requeued(settlement, reason, queues_of, take);
            }
            take(&mut session)?
        };

        let count = self.record_settlement(settlement, &outcome.entries);
        for (queue, messages) in group_by_queue(outcome.entries) {
            if let Some(index) = expected.iter().position(|name| *name == queue) {
                states[index].requeue(messages, reason, events);
            }
        }
        for state in states.iter_mut() {
            state.dispatch(events);
        }
        drop(states);

        for (_, queue) in outcome.replenished {
            if !expected.contains(&queue) {
                self.broker.dispatch(&queue);
            }
        }
        Ok(count)
    }

    /// Metrics, log and `DeliveriesSettled` for one settlement. Returns the
    /// number of entries.
    fn record_settlement(&self, settlement: Settlement, entries: &[UnackedEntry]) -> usize {
        let count = entries.len();
        if count == 0 {
            return 0;
        }

        metrics::UNACKED_MESSAGES.sub(count as f64);
        match settlement {
            Settlement::Ack => metrics::ACKS.inc_by(count as f64),
            Settlement::Nack { requeue } => metrics::NACKS
                .with_label_values(&[if requeue { "true" } else { "false" }])
                .inc_by(count as f64),
            Settlement::Recover => {}
        }
        if let Some(last) = entries.last() {
            log_delivery_event!(debug, "Deliveries settled", self.core.id, last.delivery_tag, count = count, settlement = ?settlement);
        }
        self.broker.events().publish(BrokerEvent::DeliveriesSettled {
            channel: self.core.id.0,
            kind: settlement.as_event_kind(),
            delivery_tags: entries.iter().map(|e| e.delivery_tag.0).collect(),
        });
        count
    }

    fn rejected(&self, tag: DeliveryTag, multiple: bool, err: BrokerError) -> BrokerError {
        warn!(channel = %self.core.id, delivery_tag = %tag, multiple, error = %err, "Settlement rejected");
        err
    }

    /// Requeue grouped by origin queue, dispatching each. Used by close,
    /// where no credit is handed back.
    fn requeue(&self, entries: Vec<UnackedEntry>, reason: RequeueReason) -> usize {
        let count = entries.len();
        for (queue, messages) in group_by_queue(entries) {
            if let Ok(handle) = self.broker.queue(&queue) {
                let mut state = handle.lock();
                state.requeue(messages, reason, self.broker.events());
                state.dispatch(self.broker.events());
            }
        }
        count
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChannelApi for Channel {
    fn id(&self) -> ChannelId {
        Channel::id(self)
    }

    fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Consumer, BrokerError> {
        Channel::consume(self, queue, options)
    }

    fn cancel(&self, consumer_tag: &ConsumerTag) -> Result<usize, BrokerError> {
        Channel::cancel(self, consumer_tag)
    }

    fn ack(&self, tag: DeliveryTag, multiple: bool) -> Result<usize, BrokerError> {
        Channel::ack(self, tag, multiple)
    }

    fn nack(&self, tag: DeliveryTag, multiple: bool, requeue: bool) -> Result<usize, BrokerError> {
        Channel::nack(self, tag, multiple, requeue)
    }

    fn reject(&self, tag: DeliveryTag, requeue: bool) -> Result<usize, BrokerError> {
        Channel::reject(self, tag, requeue)
    }

    fn recover(&self) -> Result<usize, BrokerError> {
        Channel::recover(self)
    }

    fn get(&self, queue: &str, auto_ack: bool) -> Result<Option<GetResponse>, BrokerError> {
        Channel::get(self, queue, auto_ack)
    }

    fn close_with(&self, reply_code: u16) -> usize {
        Channel::close_with(self, reply_code)
    }

    fn status(&self) -> ChannelStatus {
        Channel::status(self)
    }
}

/// Receiving end of one consumer. Dropping it cancels the consumer.
pub struct Consumer {
    tag: ConsumerTag,
    queue: QueueName,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    core: Arc<ChannelCore>,
    broker: Arc<BrokerShared>,
}

impl Consumer {
    pub fn tag(&self) -> &ConsumerTag {
        &self.tag
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn channel_id(&self) -> ChannelId {
        self.core.id
    }

    /// Wait for the next delivery. `None` once the consumer is cancelled
    /// and every buffered delivery has been received.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Every delivery already buffered.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while let Ok(delivery) = self.receiver.try_recv() {
            deliveries.push(delivery);
        }
        deliveries
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("tag", &self.tag)
            .field("queue", &self.queue)
            .field("channel", &self.core.id)
            .finish()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // Disconnect: same as cancel. Already cancelled is fine.
        let result = cancel_consumer(&self.broker, &self.core, &self.tag, RequeueReason::Cancel);
        if let Err(err) = result {
            trace!(consumer = %self.tag, error = %err, "Consumer handle dropped");
        }
    }
}

fn cancel_consumer(
    broker: &BrokerShared,
    core: &ChannelCore,
    tag: &ConsumerTag,
    reason: RequeueReason,
) -> Result<usize, BrokerError> {
    let queue = core.session.lock().consumer_queue(tag)?;
    let handle = broker.queue(&queue)?;
    let mut state = handle.lock();
    let requeued = state.remove_consumer(core, tag, reason, broker.events())?;
    state.dispatch(broker.events());
    Ok(requeued)
}

/// Group by origin queue, keeping tag order inside each group.
fn group_by_queue(entries: Vec<UnackedEntry>) -> Vec<(QueueName, Vec<Message>)> {
    let mut groups: Vec<(QueueName, Vec<Message>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(queue, _)| *queue == entry.queue) {
            Some((_, messages)) => messages.push(entry.message),
            None => groups.push((entry.queue, vec![entry.message])),
        }
    }
    groups
}
