//! Threaded tests on the system clock: concurrent submitters, dispatcher lanes,
//! competing consumers and the background sweeper.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use outbox_relay::delivery::Source;
use outbox_relay::idempotency::SweeperThread;
use outbox_relay::outbox::{EMAIL_QUEUE, EVENTS_TOPIC};
use outbox_relay::{
    Backoff, DeliveryClient, DeliveryError, Destination, Dispatcher, DispatcherPool,
    IdempotencyGuard, IdempotentConsumer, InMemoryBroker, InMemoryProcessedIds, InMemoryStore,
    OutboxStatus, OutboxStore, ProcessedIdStore, TransactionCoordinator,
};

use crate::support::{item_added_email, order_created, AddItem, PlaceOrder};

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

const SUBMITTERS: usize = 4;
const ORDERS_PER_SUBMITTER: usize = 5;

// ============================================================================
// Test 1: Concurrent submitters, lane pool, competing consumers
// ============================================================================

#[test]
fn every_record_published_and_handled_once() {
    let store = InMemoryStore::new();
    let coordinator = Arc::new(TransactionCoordinator::new(store.clone()));
    let broker = InMemoryBroker::new();
    let client = Arc::new(DeliveryClient::new(broker.clone()));

    let shared = PlaceOrder::new("shared", &["gift card"]);
    coordinator.submit(&shared, order_created(&shared)).unwrap();

    let dispatcher = Arc::new(
        Dispatcher::new(store.clone(), Arc::clone(&client))
            .with_worker_id("threaded")
            .with_batch_size(8)
            .with_backoff(Backoff::new(
                Duration::from_millis(1),
                Duration::from_millis(10),
            )),
    );
    broker.fail_next_n(3, DeliveryError::transient("broker restarting"));
    let pool = DispatcherPool::spawn(dispatcher, 3, Duration::from_millis(2)).unwrap();

    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|t| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                for n in 0..ORDERS_PER_SUBMITTER {
                    let order_id = format!("t{}-order-{}", t, n);
                    let place = PlaceOrder::new(&order_id, &["book"]);
                    coordinator.submit(&place, order_created(&place)).unwrap();

                    let item = format!("sticker-{}-{}", t, n);
                    coordinator
                        .submit_with_retry(&AddItem::new("shared", &item), 100, || {
                            vec![item_added_email("shared", &item)]
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    let orders = SUBMITTERS * ORDERS_PER_SUBMITTER;
    let expected = 2 + orders * 2 + orders;
    assert_eq!(store.outbox_len().unwrap(), expected);

    let all_published = wait_for(Duration::from_secs(5), || {
        store
            .records_by_status(OutboxStatus::Published)
            .map(|published| published.len() == expected)
            .unwrap_or(false)
    });
    let stats = pool.stop();
    assert!(all_published, "stats: {:?}", stats);
    assert_eq!(stats.messages_published, expected);
    assert_eq!(stats.messages_retried, 3);
    assert_eq!(stats.messages_failed, 0);

    // Each record reached the broker exactly once.
    let queued = broker.queue_messages(EMAIL_QUEUE);
    let streamed = broker.topic_log(EVENTS_TOPIC);
    let published: HashSet<String> = queued
        .iter()
        .chain(streamed.iter())
        .map(|envelope| envelope.message_id.clone())
        .collect();
    assert_eq!(queued.len() + streamed.len(), expected);
    assert_eq!(published.len(), expected);

    // The contended aggregate went out in commit order.
    let committed: Vec<String> = store
        .records_for("shared")
        .unwrap()
        .into_iter()
        .filter(|record| record.destination == Destination::Queue)
        .map(|record| record.id.to_string())
        .collect();
    let delivered: Vec<String> = queued
        .iter()
        .filter(|envelope| envelope.aggregate_id == "shared")
        .map(|envelope| envelope.message_id.clone())
        .collect();
    assert_eq!(committed.len(), 1 + orders);
    assert_eq!(delivered, committed);

    // Every email is delivered twice; two workers share one guard.
    for envelope in &queued {
        broker.inject(envelope.clone());
    }
    let guard = Arc::new(IdempotencyGuard::new(
        InMemoryProcessedIds::new(),
        Duration::from_secs(3600),
    ));
    let sent = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let consumer = IdempotentConsumer::new(Arc::clone(&client), Arc::clone(&guard));
            let broker = broker.clone();
            let sent = Arc::clone(&sent);
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(5);
                while broker.queue_len(EMAIL_QUEUE) > 0 && Instant::now() < deadline {
                    consumer
                        .poll(&Source::queue(EMAIL_QUEUE), |_| {
                            sent.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, String>(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(broker.queue_len(EMAIL_QUEUE), 0);
    assert_eq!(sent.load(Ordering::SeqCst), queued.len());
    assert_eq!(guard.store().len().unwrap(), queued.len());
}

// ============================================================================
// Test 2: The sweeper evicts in the background
// ============================================================================

#[test]
fn sweeper_thread_evicts_expired_ids() {
    let ids = InMemoryProcessedIds::new();
    let guard = Arc::new(IdempotencyGuard::new(ids.clone(), Duration::from_millis(20)));
    for n in 0..10 {
        guard.mark_processed(&format!("m-{}", n)).unwrap();
    }

    let sweeper = SweeperThread::spawn(Arc::clone(&guard), Duration::from_millis(5)).unwrap();
    let emptied = wait_for(Duration::from_secs(5), || ids.is_empty().unwrap_or(false));
    let stats = sweeper.stop();

    assert!(emptied);
    assert_eq!(stats.evicted, 10);
    assert_eq!(stats.errors, 0);
    assert!(stats.sweeps >= 1);
}
