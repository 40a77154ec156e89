//! Consumer tests: at-least-once delivery deduplicated to exactly-once effects.

use std::cell::RefCell;
use std::time::Duration;

use outbox_relay::delivery::Source;
use outbox_relay::outbox::{EMAIL_QUEUE, EVENTS_TOPIC};
use outbox_relay::{Envelope, Lane};

use crate::support::{Harness, Order, LEASE};

fn email_worker(h: &Harness, sent: &RefCell<Vec<String>>) -> outbox_relay::ConsumeReport {
    h.consumer
        .poll(&Source::queue(EMAIL_QUEUE), |envelope: &Envelope| {
            let order: Order = envelope.decode_json().map_err(|e| e.to_string())?;
            sent.borrow_mut().push(order.email);
            Ok::<_, String>(())
        })
        .unwrap()
}

// ============================================================================
// Test 1: Order placed, email sent exactly once despite redelivery
// ============================================================================

#[test]
fn order_email_is_sent_once() {
    let h = Harness::new(5);
    let ids = h.place("order-1");

    let report = h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();
    assert_eq!(report.published, 2);
    assert!(ids.iter().all(|id| h.record(*id).is_published()));

    let sent = RefCell::new(Vec::new());
    let first = email_worker(&h, &sent);
    assert_eq!(first.delivered, 1);
    assert_eq!(first.processed, 1);

    let delivered = h.broker.acknowledged();
    assert_eq!(delivered, vec![ids[0].to_string()]);

    // The broker hands the same message out again.
    let copy = Envelope::from(&h.record(ids[0]));
    assert_eq!(copy.meta("correlation_id"), Some("req-order-1"));
    h.broker.inject(copy);

    let second = email_worker(&h, &sent);
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.processed, 0);
    assert_eq!(sent.into_inner(), vec!["order-1@example.com"]);
    assert_eq!(h.broker.queue_len(EMAIL_QUEUE), 0);
}

// ============================================================================
// Test 2: Event-stream consumer groups
// ============================================================================

#[test]
fn stream_groups_each_see_every_event() {
    let h = Harness::new(5);
    h.place("order-1");
    h.place("order-2");
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();

    let mut projected = Vec::new();
    let analytics = h
        .consumer
        .poll(&Source::stream(EVENTS_TOPIC, "analytics"), |envelope| {
            let value: serde_json::Value = envelope.decode_json().map_err(|e| e.to_string())?;
            projected.push(value["data"]["id"].as_str().unwrap_or_default().to_string());
            Ok::<_, String>(())
        })
        .unwrap();
    assert_eq!(analytics.processed, 2);
    assert_eq!(projected, vec!["order-1", "order-2"]);

    // Offsets are per group; a second poll of the same group finds nothing new.
    let again = h
        .consumer
        .poll(&Source::stream(EVENTS_TOPIC, "analytics"), |_| Ok::<_, String>(()))
        .unwrap();
    assert_eq!(again.delivered, 0);
}

#[test]
fn stream_reject_holds_the_group_offset() {
    let h = Harness::new(5);
    h.place("order-1");
    h.place("order-2");
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();
    let source = Source::stream(EVENTS_TOPIC, "search");

    let failing = h
        .consumer
        .poll(&source, |_| Err::<(), _>("index offline"))
        .unwrap();
    assert_eq!(failing.delivered, 1);
    assert_eq!(failing.failed, 1);

    let recovered = h.consumer.poll(&source, |_| Ok::<_, String>(())).unwrap();
    assert_eq!(recovered.delivered, 2);
    assert_eq!(recovered.processed, 2);
}

// ============================================================================
// Test 3: Handler failures are redelivered and retried
// ============================================================================

#[test]
fn failed_handler_is_redelivered() {
    let h = Harness::new(5);
    let ids = h.place("order-1");
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();
    let source = Source::queue(EMAIL_QUEUE);

    let failed = h
        .consumer
        .poll(&source, |_| Err::<(), _>("smtp timeout"))
        .unwrap();
    assert_eq!(failed.failed, 1);
    assert_eq!(h.broker.rejected(), vec![ids[0].to_string()]);
    assert_eq!(h.broker.queue_len(EMAIL_QUEUE), 1);
    assert!(h.consumer.guard().should_process(&ids[0].to_string()).unwrap());

    let sent = RefCell::new(Vec::new());
    let retried = email_worker(&h, &sent);
    assert_eq!(retried.processed, 1);
    assert_eq!(sent.into_inner().len(), 1);
}

// ============================================================================
// Test 4: Republish after a lost mark is deduplicated
// ============================================================================

#[test]
fn unconfirmed_republish_is_a_duplicate() {
    let h = Harness::new(5);
    h.place("order-1");
    h.store.fail_next_marks(1);

    let first = h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    assert_eq!(first.unconfirmed, 1);
    h.clock.advance(LEASE);
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();
    assert_eq!(h.broker.queue_len(EMAIL_QUEUE), 2);

    let sent = RefCell::new(Vec::new());
    let report = email_worker(&h, &sent);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(sent.into_inner().len(), 1);
}

// ============================================================================
// Test 5: Retention bounds how long an id is remembered
// ============================================================================

#[test]
fn ids_are_forgotten_after_retention() {
    let h = Harness::new(5);
    let ids = h.place("order-1");
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();
    let sent = RefCell::new(Vec::new());
    email_worker(&h, &sent);

    let guard = h.consumer.guard();
    let message_id = ids[0].to_string();
    assert!(!guard.should_process(&message_id).unwrap());

    h.clock.advance(guard.retention() + Duration::from_secs(1));
    assert_eq!(guard.sweep().unwrap(), 1);
    assert!(guard.should_process(&message_id).unwrap());
}

// ============================================================================
// Test 6: Broker outages surface as transient errors
// ============================================================================

#[test]
fn unreachable_broker_is_transient_for_consumers() {
    let h = Harness::new(5);
    h.broker.set_unreachable(true);

    let err = h
        .consumer
        .poll(&Source::queue(EMAIL_QUEUE), |_| Ok::<_, String>(()))
        .unwrap_err();
    assert!(err.is_transient());
    assert!(!h.client.is_connected());

    h.broker.set_unreachable(false);
    let report = h
        .consumer
        .poll(&Source::queue(EMAIL_QUEUE), |_| Ok::<_, String>(()))
        .unwrap();
    assert_eq!(report.delivered, 0);
    assert!(h.client.is_connected());
}
