//! # Prefetch Scenarios
//!
//! End-to-end flows through the public broker API:
//!
//! 1. **Credit limit**: a limited consumer never holds more than its prefetch
//! 2. **Settlement**: single and cumulative ack, nack with and without requeue,
//!    recover
//! 3. **Validation**: bad prefetch arguments register nothing
//! 4. **Lifecycle**: cancel, consumer drop and channel close requeue everything
//!    outstanding
//! 5. **Command handler**: the same flows driven through `ChannelCommand`s

#[cfg(test)]
mod tests {
    use crate::{bodies, broker_with_queues, publish_numbered};
    use qmq_bus::{BrokerEvent, EventFilter, EventTopic, RequeueReason, SettleKind};
    use qmq_prefetch::{
        Broker, BrokerConfig, BrokerError, Channel, ChannelCommand, ChannelCommandHandler,
        ChannelReply, ConsumeOptions, Consumer, DeliveryTag, ErrorKind, FieldTable, FieldValue,
        GetResponse, MessageId,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    /// Pull one message with `get` and ack it singly while `consumer` sits at
    /// its limit. The get delivery holds no consumer credit, so nothing flows.
    fn get_and_ack_leaves_consumer_blocked(
        channel: &Channel,
        consumer: &mut Consumer,
    ) -> GetResponse {
        let got = channel.get("jobs", false).unwrap().unwrap();
        assert_eq!(channel.ack(got.delivery_tag, false).unwrap(), 1);
        assert!(consumer.drain().is_empty());
        got
    }

    // =============================================================================
    // CREDIT LIMIT
    // =============================================================================

    #[test]
    fn test_prefetch_five_single_acks() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 15);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(5u32))
            .unwrap();

        let first = consumer.drain();
        assert_eq!(bodies(&first), vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 10);

        let got = get_and_ack_leaves_consumer_blocked(&channel, &mut consumer);
        assert_eq!(got.delivery_tag, DeliveryTag(6));
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 9);

        for delivery in &first {
            assert_eq!(channel.ack(delivery.delivery_tag, false).unwrap(), 1);
        }

        let second = consumer.drain();
        assert_eq!(bodies(&second), vec!["m6", "m7", "m8", "m9", "m10"]);
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 4);
        assert_eq!(channel.status().unacked, 5);
    }

    #[test]
    fn test_cumulative_ack_releases_all_credit() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 15);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(5u32))
            .unwrap();

        let first = consumer.drain();
        let last = first.last().unwrap().delivery_tag;
        assert_eq!(last, DeliveryTag(5));
        get_and_ack_leaves_consumer_blocked(&channel, &mut consumer);
        assert_eq!(channel.ack(last, true).unwrap(), 5);

        let second = consumer.drain();
        assert_eq!(bodies(&second), vec!["m6", "m7", "m8", "m9", "m10"]);
        assert!(second.iter().all(|d| !d.redelivered));
        assert_eq!(channel.status().unacked, 5);
    }

    #[test]
    fn test_nack_multiple_requeues_to_head_redelivered() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 9);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(5u32))
            .unwrap();

        let first = consumer.drain();
        get_and_ack_leaves_consumer_blocked(&channel, &mut consumer);
        assert_eq!(channel.nack(DeliveryTag(5), true, true).unwrap(), 5);

        let again = consumer.drain();
        assert_eq!(bodies(&again), bodies(&first));
        assert!(again.iter().all(|d| d.redelivered));
        assert_eq!(
            again.iter().map(|d| d.message_id).collect::<Vec<_>>(),
            first.iter().map(|d| d.message_id).collect::<Vec<_>>()
        );
        // Fresh tags for redeliveries
        assert_eq!(again[0].delivery_tag, DeliveryTag(7));
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 3);
    }

    #[test]
    fn test_recover_requeues_everything_outstanding() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 6);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(5u32))
            .unwrap();
        assert_eq!(consumer.drain().len(), 5);
        get_and_ack_leaves_consumer_blocked(&channel, &mut consumer);

        assert_eq!(channel.recover().unwrap(), 5);

        let again = consumer.drain();
        assert_eq!(bodies(&again), vec!["m0", "m1", "m2", "m3", "m4"]);
        assert!(again.iter().all(|d| d.redelivered));
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 0);
    }

    #[test]
    fn test_partial_fill_then_publish_fills_remaining_credit() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 5);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(10u32))
            .unwrap();
        assert_eq!(consumer.drain().len(), 5);
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 0);

        publish_numbered(&broker, "jobs", 10);
        assert_eq!(consumer.drain().len(), 5);
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 5);

        channel.ack(DeliveryTag(3), true).unwrap();
        assert_eq!(consumer.drain().len(), 3);
    }

    #[test]
    fn test_auto_ack_ignores_prefetch() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 20);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume(
                "jobs",
                ConsumeOptions::new().prefetch(1u32).auto_ack(true),
            )
            .unwrap();

        assert_eq!(consumer.drain().len(), 20);
        assert_eq!(channel.status().unacked, 0);
        assert!(matches!(
            channel.ack(DeliveryTag(1), false),
            Err(BrokerError::UnknownDeliveryTag { .. })
        ));
    }

    #[test]
    fn test_prefetch_zero_is_unlimited() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 100);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(0u32))
            .unwrap();

        assert_eq!(consumer.drain().len(), 100);
        assert_eq!(channel.status().unacked, 100);
    }

    #[test]
    fn test_raising_prefetch_delivers_immediately() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 6);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(2u32))
            .unwrap();
        assert_eq!(consumer.drain().len(), 2);

        channel
            .set_prefetch(consumer.tag(), &FieldValue::U32(4))
            .unwrap();
        assert_eq!(consumer.drain().len(), 2);

        // Lowering below outstanding delivers nothing until acks catch up
        channel
            .set_prefetch(consumer.tag(), &FieldValue::U32(1))
            .unwrap();
        channel.ack(DeliveryTag(1), false).unwrap();
        assert!(consumer.drain().is_empty());
        channel.ack(DeliveryTag(4), true).unwrap();
        assert_eq!(consumer.drain().len(), 1);
    }

    #[test]
    fn test_round_robin_between_limited_consumers() {
        let broker = broker_with_queues(&["jobs"]);
        let channel = broker.open_channel();
        let mut a = channel
            .consume("jobs", ConsumeOptions::new().tag("a").prefetch(2u32))
            .unwrap();
        let mut b = channel
            .consume("jobs", ConsumeOptions::new().tag("b").prefetch(2u32))
            .unwrap();

        publish_numbered(&broker, "jobs", 6);

        assert_eq!(bodies(&a.drain()), vec!["m0", "m2"]);
        assert_eq!(bodies(&b.drain()), vec!["m1", "m3"]);
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 2);
    }

    // =============================================================================
    // SETTLEMENT
    // =============================================================================

    #[test]
    fn test_ack_unknown_or_settled_tag_fails_without_changes() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 3);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(3u32))
            .unwrap();
        assert_eq!(consumer.drain().len(), 3);

        channel.ack(DeliveryTag(2), false).unwrap();
        let err = channel.ack(DeliveryTag(2), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(err.reply_code(), 406);

        assert!(channel.ack(DeliveryTag(99), true).is_err());
        assert_eq!(channel.status().unacked, 2);
    }

    #[test]
    fn test_multiple_ack_skips_already_settled_tags() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 4);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(4u32))
            .unwrap();
        assert_eq!(consumer.drain().len(), 4);

        channel.ack(DeliveryTag(2), false).unwrap();
        assert_eq!(channel.ack(DeliveryTag(3), true).unwrap(), 2);
        assert_eq!(channel.status().unacked, 1);
    }

    #[test]
    fn test_nack_without_requeue_dead_letters() {
        let broker = broker_with_queues(&["jobs"]);
        let mut dead = broker.subscribe(EventFilter::topics(vec![EventTopic::DeadLetter]));
        publish_numbered(&broker, "jobs", 2);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(1u32))
            .unwrap();
        let first = consumer.drain();

        assert_eq!(channel.reject(first[0].delivery_tag, false).unwrap(), 1);

        assert_eq!(
            dead.drain(),
            vec![BrokerEvent::MessageDeadLettered {
                queue: "jobs".to_string(),
                message_id: first[0].message_id.0,
                payload: b"m0".to_vec(),
            }]
        );
        // Credit came back: next message flows, original is gone
        assert_eq!(bodies(&consumer.drain()), vec!["m1"]);
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 0);
    }

    #[test]
    fn test_single_nack_without_requeue_at_limit() {
        let broker = broker_with_queues(&["jobs"]);
        let mut dead = broker.subscribe(EventFilter::topics(vec![EventTopic::DeadLetter]));
        publish_numbered(&broker, "jobs", 15);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(5u32))
            .unwrap();
        let first = consumer.drain();
        get_and_ack_leaves_consumer_blocked(&channel, &mut consumer);

        assert_eq!(channel.nack(first[2].delivery_tag, false, false).unwrap(), 1);

        assert_eq!(
            dead.drain(),
            vec![BrokerEvent::MessageDeadLettered {
                queue: "jobs".to_string(),
                message_id: first[2].message_id.0,
                payload: b"m2".to_vec(),
            }]
        );
        let next = consumer.drain();
        assert_eq!(bodies(&next), vec!["m6"]);
        assert!(!next[0].redelivered);
        assert_eq!(channel.status().unacked, 5);
    }

    #[test]
    fn test_multiple_nack_without_requeue_at_limit() {
        let broker = broker_with_queues(&["jobs"]);
        let mut dead = broker.subscribe(EventFilter::topics(vec![EventTopic::DeadLetter]));
        publish_numbered(&broker, "jobs", 15);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(5u32))
            .unwrap();
        let first = consumer.drain();
        get_and_ack_leaves_consumer_blocked(&channel, &mut consumer);

        let last = first.last().unwrap().delivery_tag;
        assert_eq!(channel.nack(last, true, false).unwrap(), 5);

        let expected: Vec<BrokerEvent> = first
            .iter()
            .map(|d| BrokerEvent::MessageDeadLettered {
                queue: "jobs".to_string(),
                message_id: d.message_id.0,
                payload: d.payload.to_vec(),
            })
            .collect();
        assert_eq!(dead.drain(), expected);

        let next = consumer.drain();
        assert_eq!(bodies(&next), vec!["m6", "m7", "m8", "m9", "m10"]);
        assert!(next.iter().all(|d| !d.redelivered));
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 4);
    }

    #[test]
    fn test_get_deliveries_share_tag_space_and_recover() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 3);
        let channel = broker.open_channel();

        let got = channel.get("jobs", false).unwrap().unwrap();
        assert_eq!(got.delivery_tag, DeliveryTag(1));
        assert_eq!(got.message_id, MessageId(1));
        assert_eq!(got.message_count, 2);

        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(1u32))
            .unwrap();
        let delivered = consumer.drain();
        assert_eq!(delivered[0].delivery_tag, DeliveryTag(2));

        // Cumulative ack on a consumer tag leaves the get delivery alone
        assert_eq!(channel.ack(DeliveryTag(2), true).unwrap(), 1);
        assert_eq!(channel.status().unacked, 2);

        assert_eq!(channel.recover().unwrap(), 2);
    }

    // =============================================================================
    // VALIDATION
    // =============================================================================

    #[test]
    fn test_invalid_prefetch_registers_nothing() {
        let broker = broker_with_queues(&["jobs"]);
        let channel = broker.open_channel();

        let negative = channel.consume(
            "jobs",
            ConsumeOptions::new().tag("bad").prefetch(-1i64),
        );
        assert!(matches!(
            negative,
            Err(BrokerError::PrefetchOutOfRange { value: -1, .. })
        ));

        let text = channel.consume("jobs", ConsumeOptions::new().tag("bad").prefetch("banana"));
        assert!(matches!(text, Err(BrokerError::PrefetchWrongType { .. })));

        let table = channel.consume(
            "jobs",
            ConsumeOptions::new()
                .tag("bad")
                .prefetch(FieldValue::Table(FieldTable::new())),
        );
        assert_eq!(table.unwrap_err().kind(), ErrorKind::InvalidArgument);

        assert_eq!(broker.queue_status("jobs").unwrap().consumers, 0);
        assert!(channel.status().consumers.is_empty());

        // Messages never reach the rejected tag, and it stays free
        publish_numbered(&broker, "jobs", 1);
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 1);
        let mut good = channel
            .consume("jobs", ConsumeOptions::new().tag("bad").prefetch(1u32))
            .unwrap();
        assert_eq!(good.drain().len(), 1);
    }

    #[test]
    fn test_large_prefetch_accepted_by_default() {
        let broker = broker_with_queues(&["jobs"]);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(100_000u32))
            .unwrap();
        publish_numbered(&broker, "jobs", 3);
        assert_eq!(consumer.drain().len(), 3);
        assert_eq!(channel.status().consumers[0].limit, 100_000);
    }

    #[test]
    fn test_configured_max_prefetch_enforced() {
        let config = BrokerConfig {
            max_prefetch: 100,
            ..BrokerConfig::default()
        };
        let broker = Broker::new(config).unwrap();
        broker.declare_queue("jobs");
        let channel = broker.open_channel();

        let result = channel.consume("jobs", ConsumeOptions::new().prefetch(101u32));
        assert!(matches!(
            result,
            Err(BrokerError::PrefetchOutOfRange {
                value: 101,
                max: 100
            })
        ));
        assert_eq!(broker.queue_status("jobs").unwrap().consumers, 0);
        assert!(channel
            .consume("jobs", ConsumeOptions::new().prefetch(100u32))
            .is_ok());
    }

    #[test]
    fn test_duplicate_consumer_tag_rejected() {
        let broker = broker_with_queues(&["jobs"]);
        let channel = broker.open_channel();
        let _first = channel
            .consume("jobs", ConsumeOptions::new().tag("dup"))
            .unwrap();
        let second = channel.consume("jobs", ConsumeOptions::new().tag("dup"));
        assert_eq!(second.unwrap_err().kind(), ErrorKind::NotAllowed);
        assert_eq!(broker.queue_status("jobs").unwrap().consumers, 1);
    }

    // =============================================================================
    // LIFECYCLE
    // =============================================================================

    #[test]
    fn test_cancel_requeues_to_other_consumer() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 4);
        let channel = broker.open_channel();
        let mut a = channel
            .consume("jobs", ConsumeOptions::new().tag("a").prefetch(2u32))
            .unwrap();
        let mut b = channel
            .consume("jobs", ConsumeOptions::new().tag("b").prefetch(2u32))
            .unwrap();
        assert_eq!(bodies(&a.drain()), vec!["m0", "m1"]);
        assert_eq!(bodies(&b.drain()), vec!["m2", "m3"]);

        assert_eq!(channel.cancel(a.tag()).unwrap(), 2);

        b.drain();
        channel.ack(DeliveryTag(4), false).unwrap();
        let redelivered = b.drain();
        assert_eq!(bodies(&redelivered), vec!["m0"]);
        assert!(redelivered[0].redelivered);
    }

    #[test]
    fn test_dropping_consumer_requeues() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 3);
        let channel = broker.open_channel();
        let consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(2u32))
            .unwrap();
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 1);

        drop(consumer);

        assert_eq!(broker.queue_status("jobs").unwrap().ready, 3);
        assert_eq!(broker.queue_status("jobs").unwrap().consumers, 0);
        assert_eq!(channel.status().unacked, 0);
    }

    #[test]
    fn test_channel_close_requeues_and_emits_events() {
        let broker = broker_with_queues(&["jobs"]);
        let mut events = broker.subscribe(EventFilter::topics(vec![
            EventTopic::Queue,
            EventTopic::Consumer,
        ]));
        publish_numbered(&broker, "jobs", 3);
        let channel = broker.open_channel();
        let _consumer = channel
            .consume("jobs", ConsumeOptions::new().tag("c").prefetch(2u32))
            .unwrap();

        assert_eq!(channel.close(), 2);
        assert!(!channel.is_open());
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 3);
        assert!(matches!(
            channel.ack(DeliveryTag(1), false),
            Err(BrokerError::ChannelClosed(_))
        ));

        let seen = events.drain();
        assert!(seen.contains(&BrokerEvent::MessagesRequeued {
            queue: "jobs".to_string(),
            count: 2,
            reason: RequeueReason::ChannelClosed,
        }));
        assert!(seen.iter().any(|e| matches!(
            e,
            BrokerEvent::ConsumerCancelled { requeued: 2, .. }
        )));
        assert!(seen.iter().any(|e| matches!(
            e,
            BrokerEvent::ChannelClosed {
                reply_code: 200,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_async_consumer_receives_after_ack() {
        let broker = broker_with_queues(&["jobs"]);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(1u32))
            .unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            for i in 0..2 {
                publisher.publish("jobs", format!("m{i}")).unwrap();
            }
        });

        let first = timeout(Duration::from_secs(1), consumer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&first.payload[..], b"m0");
        assert!(timeout(Duration::from_millis(50), consumer.recv())
            .await
            .is_err());

        channel.ack(first.delivery_tag, false).unwrap();
        let second = timeout(Duration::from_secs(1), consumer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&second.payload[..], b"m1");
    }

    #[tokio::test]
    async fn test_event_stream_follows_settlements() {
        let broker = broker_with_queues(&["jobs"]);
        let mut settled = broker
            .event_bus()
            .event_stream(EventFilter::topics(vec![EventTopic::Acknowledgement]));
        publish_numbered(&broker, "jobs", 3);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("jobs", ConsumeOptions::new().prefetch(2u32))
            .unwrap();
        assert_eq!(consumer.drain().len(), 2);

        channel.ack(DeliveryTag(2), true).unwrap();
        let event = timeout(Duration::from_secs(1), settled.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            BrokerEvent::DeliveriesSettled {
                channel: channel.id().0,
                kind: SettleKind::Ack,
                delivery_tags: vec![1, 2],
            }
        );

        // The freed credit pulled m2; nothing else is settled yet
        assert_eq!(bodies(&consumer.drain()), vec!["m2"]);
        assert!(timeout(Duration::from_millis(50), settled.next())
            .await
            .is_err());
    }

    #[test]
    fn test_flow_shows_up_in_metrics() {
        let _guard = qmq_telemetry::init_telemetry(qmq_telemetry::TelemetryConfig::for_tests())
            .unwrap();
        let broker = broker_with_queues(&["metered"]);
        publish_numbered(&broker, "metered", 2);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("metered", ConsumeOptions::new().prefetch(1u32))
            .unwrap();
        let first = consumer.drain();
        channel.nack(first[0].delivery_tag, false, true).unwrap();
        let _ = channel.consume("metered", ConsumeOptions::new().prefetch("x"));

        let text = qmq_telemetry::gather_text().unwrap();
        for name in [
            "qmq_dispatch_deliveries_total",
            "qmq_dispatch_credit_blocked_total",
            "qmq_ack_negative_total",
            "qmq_ack_requeued_total",
            "qmq_consumers_rejected_total",
        ] {
            assert!(text.contains(name), "missing {name}");
        }
    }

    // =============================================================================
    // COMMAND HANDLER
    // =============================================================================

    #[test]
    fn test_handler_drives_prefetch_flow() {
        let broker = broker_with_queues(&["jobs"]);
        let mut handler = ChannelCommandHandler::new(Arc::new(broker.clone()));

        let reply = handler.handle(ChannelCommand::Consume {
            queue: "jobs".to_string(),
            consumer_tag: "worker".to_string(),
            auto_ack: false,
            arguments: FieldTable::new().with("x-prefetch", 2u32),
        });
        assert_eq!(
            reply,
            ChannelReply::ConsumeOk {
                consumer_tag: "worker".to_string()
            }
        );

        for i in 0..4 {
            handler.handle(ChannelCommand::Publish {
                queue: "jobs".to_string(),
                payload: format!("m{i}").into_bytes(),
            });
        }
        let pending = handler.pending_deliveries();
        assert_eq!(bodies(&pending), vec!["m0", "m1"]);

        assert_eq!(
            handler.handle(ChannelCommand::Nack {
                delivery_tag: 2,
                multiple: true,
                requeue: true,
            }),
            ChannelReply::Settled { count: 2 }
        );
        let again = handler.pending_deliveries();
        assert_eq!(bodies(&again), vec!["m0", "m1"]);
        assert!(again.iter().all(|d| d.redelivered));
    }

    #[test]
    fn test_handler_channel_exception_requeues() {
        let broker = broker_with_queues(&["jobs"]);
        publish_numbered(&broker, "jobs", 2);
        let mut handler = ChannelCommandHandler::new(Arc::new(broker.clone()));
        handler.handle(ChannelCommand::Consume {
            queue: "jobs".to_string(),
            consumer_tag: String::new(),
            auto_ack: false,
            arguments: FieldTable::new(),
        });
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 0);

        let reply = handler.handle(ChannelCommand::Ack {
            delivery_tag: 7,
            multiple: false,
        });
        assert!(matches!(
            reply,
            ChannelReply::Closed {
                reply_code: 406,
                ..
            }
        ));
        assert_eq!(broker.queue_status("jobs").unwrap().ready, 2);
        assert_eq!(broker.queue_status("jobs").unwrap().consumers, 0);
    }
}
