//! # Concurrency
//!
//! Publishers, consumers and acks racing across threads. The credit limit
//! must hold at every observation point, no message may be lost or
//! delivered twice, and a requeued message must be redelivered before
//! anything published meanwhile.

#[cfg(test)]
mod tests {
    use crate::broker_with_queues;
    use qmq_prefetch::{ConsumeOptions, Delivery, MessageId};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    const PREFETCH: u32 = 3;
    const PUBLISHERS: usize = 4;
    const PER_PUBLISHER: usize = 250;
    const CONSUMERS: usize = 3;

    async fn next_batch(consumer: &mut qmq_prefetch::Consumer) -> Vec<Delivery> {
        let mut batch = Vec::new();
        while let Ok(Some(delivery)) = timeout(Duration::from_millis(20), consumer.recv()).await {
            batch.push(delivery);
        }
        batch
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_outstanding_never_exceeds_prefetch_under_load() {
        let broker = broker_with_queues(&["load"]);
        let total = PUBLISHERS * PER_PUBLISHER;
        let settled = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..CONSUMERS {
            let channel = broker.open_channel();
            let mut consumer = channel
                .consume("load", ConsumeOptions::new().prefetch(PREFETCH))
                .unwrap();
            let settled = settled.clone();
            workers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    let batch = next_batch(&mut consumer).await;
                    if batch.is_empty() {
                        if settled.load(Ordering::SeqCst) >= total {
                            break;
                        }
                        continue;
                    }
                    assert!(batch.len() as u32 <= PREFETCH, "batch of {}", batch.len());
                    let status = channel.status();
                    assert!(status.consumers.iter().all(|c| c.outstanding <= PREFETCH));
                    assert!(status.unacked as u32 <= PREFETCH);

                    let last = batch[batch.len() - 1].delivery_tag;
                    seen.extend(batch.iter().map(|d| d.message_id));
                    let count = channel.ack(last, true).unwrap();
                    settled.fetch_add(count, Ordering::SeqCst);
                }
                drop(consumer);
                seen
            }));
        }

        let publishers: Vec<_> = (0..PUBLISHERS)
            .map(|p| {
                let broker = broker.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PUBLISHER {
                        broker.publish("load", format!("{p}-{i}")).unwrap();
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.join().unwrap();
        }

        let mut delivered: Vec<MessageId> = Vec::new();
        for worker in workers {
            let seen = timeout(Duration::from_secs(30), worker)
                .await
                .expect("workers stalled")
                .unwrap();
            delivered.extend(seen);
        }

        let unique: HashSet<MessageId> = delivered.iter().copied().collect();
        assert_eq!(unique.len(), delivered.len(), "duplicate delivery");
        assert_eq!(delivered.len(), total);
        assert_eq!(broker.queue_status("load").unwrap().ready, 0);
    }

    #[test]
    fn test_concurrent_acks_on_shared_channel() {
        let broker = broker_with_queues(&["shared"]);
        let channel = Arc::new(broker.open_channel());
        let mut consumer = channel
            .consume("shared", ConsumeOptions::new().prefetch(0u32))
            .unwrap();
        for i in 0..400 {
            broker.publish("shared", format!("m{i}")).unwrap();
        }
        let deliveries = consumer.drain();
        assert_eq!(deliveries.len(), 400);

        // Each thread acks a disjoint quarter; every tag settles exactly once
        let handles: Vec<_> = deliveries
            .chunks(100)
            .map(|chunk| {
                let channel = channel.clone();
                let tags: Vec<_> = chunk.iter().map(|d| d.delivery_tag).collect();
                std::thread::spawn(move || {
                    tags.into_iter()
                        .map(|tag| channel.ack(tag, false).unwrap())
                        .sum::<usize>()
                })
            })
            .collect();

        let settled: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(settled, 400);
        assert_eq!(channel.status().unacked, 0);
        assert!(channel.ack(deliveries[0].delivery_tag, false).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_requeued_message_is_next_despite_concurrent_publish() {
        const ROUNDS: usize = 2_000;
        let broker = broker_with_queues(&["race"]);
        let channel = broker.open_channel();
        let mut consumer = channel
            .consume("race", ConsumeOptions::new().prefetch(1u32))
            .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let publisher = {
            let broker = broker.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    if broker.queue_status("race").unwrap().ready < 32 {
                        broker.publish("race", format!("p{i}")).unwrap();
                        i += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };

        for round in 0..ROUNDS {
            let first = timeout(Duration::from_secs(5), consumer.recv())
                .await
                .expect("no delivery")
                .unwrap();

            // Alternate between the two requeueing settlements
            if round % 2 == 0 {
                assert_eq!(channel.nack(first.delivery_tag, false, true).unwrap(), 1);
            } else {
                assert_eq!(channel.recover().unwrap(), 1);
            }

            let again = timeout(Duration::from_secs(5), consumer.recv())
                .await
                .expect("no redelivery")
                .unwrap();
            assert_eq!(
                again.message_id, first.message_id,
                "round {round}: requeued message overtaken"
            );
            assert!(again.redelivered);
            channel.ack(again.delivery_tag, false).unwrap();
        }

        stop.store(true, Ordering::SeqCst);
        publisher.join().unwrap();
    }
}
