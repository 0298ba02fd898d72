//! Command handler for one client channel.
//!
//! Turns decoded [`ChannelCommand`]s into broker calls. Any failed command
//! is a channel exception: the channel is closed (requeueing everything
//! outstanding) and the reply carries the AMQP code. Every later command
//! gets a 504 reply.

use crate::application::{Consumer, REPLY_SUCCESS};
use crate::domain::{
    BrokerError, ChannelStatus, ConsumeOptions, ConsumerTag, Delivery, DeliveryTag,
};
use crate::ipc::commands::{ChannelCommand, ChannelReply};
use crate::ports::{BrokerApi, ChannelApi};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Command handler bound to one channel.
pub struct ChannelCommandHandler {
    broker: Arc<dyn BrokerApi>,
    channel: Box<dyn ChannelApi>,
    consumers: BTreeMap<ConsumerTag, Consumer>,
    closed: Option<u16>,
}

impl ChannelCommandHandler {
    /// Opens a fresh channel on `broker`.
    pub fn new(broker: Arc<dyn BrokerApi>) -> Self {
        let channel = Box::new(broker.open_channel());
        Self {
            broker,
            channel,
            consumers: BTreeMap::new(),
            closed: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Reply code the channel was closed with, if closed.
    pub fn close_code(&self) -> Option<u16> {
        self.closed
    }

    pub fn status(&self) -> ChannelStatus {
        self.channel.status()
    }

    /// Handles one command.
    pub fn handle(&mut self, command: ChannelCommand) -> ChannelReply {
        let name = command.name();
        if self.closed.is_some() {
            let err = BrokerError::ChannelClosed(self.channel.id());
            return ChannelReply::Closed {
                reply_code: err.reply_code(),
                reply_text: err.to_string(),
            };
        }

        debug!(channel = %self.channel.id(), command = name, "Handling command");
        match self.execute(command) {
            Ok(reply) => reply,
            Err(err) => {
                let reply_code = err.reply_code();
                let reply_text = err.to_string();
                warn!(
                    channel = %self.channel.id(),
                    command = name,
                    reply_code,
                    error = %reply_text,
                    "Channel exception"
                );
                self.shutdown(reply_code);
                ChannelReply::Closed {
                    reply_code,
                    reply_text,
                }
            }
        }
    }

    /// Every delivery buffered for this channel's consumers, in tag order.
    pub fn pending_deliveries(&mut self) -> Vec<Delivery> {
        let mut deliveries: Vec<Delivery> = self
            .consumers
            .values_mut()
            .flat_map(|consumer| consumer.drain())
            .collect();
        deliveries.sort_by_key(|d| d.delivery_tag);
        deliveries
    }

    fn execute(&mut self, command: ChannelCommand) -> Result<ChannelReply, BrokerError> {
        let reply = match command {
            ChannelCommand::Consume {
                queue,
                consumer_tag,
                auto_ack,
                arguments,
            } => {
                let options = ConsumeOptions {
                    consumer_tag,
                    auto_ack,
                    arguments,
                };
                let consumer = self.channel.consume(&queue, options)?;
                let tag = consumer.tag().clone();
                self.consumers.insert(tag.clone(), consumer);
                ChannelReply::ConsumeOk {
                    consumer_tag: tag.to_string(),
                }
            }
            ChannelCommand::Publish { queue, payload } => {
                let id = self.broker.publish(&queue, Bytes::from(payload))?;
                ChannelReply::Published { message_id: id.0 }
            }
            ChannelCommand::Get { queue, auto_ack } => match self.channel.get(&queue, auto_ack)? {
                Some(response) => ChannelReply::GetOk {
                    delivery_tag: response.delivery_tag.0,
                    message_id: response.message_id.0,
                    payload: response.payload.to_vec(),
                    redelivered: response.redelivered,
                    message_count: response.message_count,
                },
                None => ChannelReply::GetEmpty,
            },
            ChannelCommand::Ack {
                delivery_tag,
                multiple,
            } => ChannelReply::Settled {
                count: self.channel.ack(DeliveryTag(delivery_tag), multiple)?,
            },
            ChannelCommand::Nack {
                delivery_tag,
                multiple,
                requeue,
            } => ChannelReply::Settled {
                count: self
                    .channel
                    .nack(DeliveryTag(delivery_tag), multiple, requeue)?,
            },
            ChannelCommand::Reject {
                delivery_tag,
                requeue,
            } => ChannelReply::Settled {
                count: self.channel.reject(DeliveryTag(delivery_tag), requeue)?,
            },
            ChannelCommand::Recover => ChannelReply::RecoverOk {
                requeued: self.channel.recover()?,
            },
            ChannelCommand::Cancel { consumer_tag } => {
                let tag = ConsumerTag::new(consumer_tag);
                let requeued = self.channel.cancel(&tag)?;
                self.consumers.remove(&tag);
                ChannelReply::CancelOk {
                    consumer_tag: tag.to_string(),
                    requeued,
                }
            }
            ChannelCommand::Close => {
                self.shutdown(REPLY_SUCCESS);
                ChannelReply::CloseOk
            }
        };
        Ok(reply)
    }

    fn shutdown(&mut self, reply_code: u16) {
        self.channel.close_with(reply_code);
        self.consumers.clear();
        self.closed = Some(reply_code);
    }
}
