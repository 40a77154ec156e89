//! Dispatcher tests: retries, permanent failures, lease expiry, ordering.

use std::time::Duration;

use outbox_relay::dispatch::RecordOutcome;
use outbox_relay::outbox::{EMAIL_QUEUE, EVENTS_TOPIC};
use outbox_relay::store::{LeaseRequest, LeaseToken};
use outbox_relay::{DeliveryError, FailureReason, Lane, OutboxStatus, OutboxStore, StoreError};

use crate::support::{item_added_email, AddItem, Harness, LEASE};

// ============================================================================
// Test 1: Transient failures are retried with backoff until published
// ============================================================================

#[test]
fn transient_failures_then_success() {
    let h = Harness::new(5);
    let ids = h.place("order-1");
    h.broker
        .fail_next_n(3, DeliveryError::transient("broker unreachable"));

    for attempt in 1..=3 {
        let report = h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
        assert_eq!(report.retried, 1, "attempt {}", attempt);

        let email = h.record(ids[0]);
        assert_eq!(email.status, OutboxStatus::Pending);
        assert_eq!(email.attempts, attempt);
        assert_eq!(email.last_error.as_deref(), Some("broker unreachable"));

        // Still inside the backoff window: nothing is due.
        assert!(h.dispatcher.run_cycle(Lane::GLOBAL).unwrap().is_idle());
        h.skip_backoff();
    }

    let report = h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    assert_eq!(report.published, 1);

    let email = h.record(ids[0]);
    assert_eq!(email.status, OutboxStatus::Published);
    assert_eq!(email.attempts, 4);
    assert_eq!(email.last_error, None);
    assert_eq!(h.broker.queue_len(EMAIL_QUEUE), 1);
    assert!(h.alerts.is_empty());

    // The event behind it goes out next.
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();
    assert!(h.record(ids[1]).is_published());
    assert_eq!(h.broker.topic_log(EVENTS_TOPIC).len(), 1);
}

#[test]
fn exhausted_budget_fails_with_alert() {
    let h = Harness::new(3);
    let ids = h.place("order-1");
    h.broker
        .fail_next_n(3, DeliveryError::transient("timeout"));

    for _ in 0..3 {
        h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
        h.skip_backoff();
    }

    let email = h.record(ids[0]);
    assert_eq!(email.status, OutboxStatus::Failed);
    assert_eq!(email.attempts, 3);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].record_id, ids[0]);
    assert_eq!(
        alerts[0].reason,
        FailureReason::BudgetExhausted {
            attempts: 3,
            last_error: "timeout".into(),
        }
    );
}

// ============================================================================
// Test 2: Permanent failures are never retried
// ============================================================================

#[test]
fn permanent_failure_is_final() {
    let h = Harness::new(5);
    let ids = h.place("order-1");
    h.broker
        .fail_next(DeliveryError::permanent("payload too large"));

    let report = h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    assert_eq!(report.failed, 1);

    let email = h.record(ids[0]);
    assert_eq!(email.status, OutboxStatus::Failed);
    assert_eq!(email.attempts, 1);
    assert!(email.failed_at.is_some());

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].aggregate_id, "order-1");
    assert_eq!(
        alerts[0].reason,
        FailureReason::Permanent("payload too large".into())
    );

    // Later cycles move on to the event and never touch the failed record.
    h.clock.advance(LEASE * 10);
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();
    assert_eq!(h.record(ids[0]).attempts, 1);
    assert!(h.record(ids[1]).is_published());
    assert_eq!(h.broker.queue_len(EMAIL_QUEUE), 0);
}

#[test]
fn requeued_record_gets_a_fresh_budget() {
    let h = Harness::new(2);
    let ids = h.place("order-1");
    h.broker.fail_next_n(2, DeliveryError::transient("timeout"));

    h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    h.skip_backoff();
    h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    assert!(h.record(ids[0]).is_failed());
    assert_eq!(h.store.failed_records().unwrap().len(), 1);

    assert!(h.store.requeue_failed(ids[0]).unwrap());
    assert!(!h.store.requeue_failed(ids[0]).unwrap());

    let requeued = h.record(ids[0]);
    assert_eq!(requeued.status, OutboxStatus::Pending);
    assert_eq!(requeued.budget_used(), 0);

    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();
    let email = h.record(ids[0]);
    assert!(email.is_published());
    assert_eq!(email.attempts, 3);
}

// ============================================================================
// Test 3: Expired leases make records visible again
// ============================================================================

#[test]
fn crashed_worker_lease_expires() {
    let h = Harness::new(5);
    let ids = h.place("order-1");

    let taken = h
        .store
        .lease_pending(&LeaseRequest::new("crashed", 10, LEASE))
        .unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].leased_by.as_deref(), Some("crashed"));

    // Invisible to everyone while the lease holds.
    assert!(h.dispatcher.run_cycle(Lane::GLOBAL).unwrap().is_idle());
    h.clock.advance(LEASE - Duration::from_secs(1));
    assert!(h.dispatcher.run_cycle(Lane::GLOBAL).unwrap().is_idle());

    h.clock.advance(Duration::from_secs(1));
    let report = h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    assert_eq!(report.published, 1);

    let email = h.record(ids[0]);
    assert!(email.is_published());
    assert_eq!(email.attempts, 2);
}

#[test]
fn lease_respects_limit_and_skips_terminal_records() {
    let h = Harness::new(5);
    for n in 0..5 {
        h.place(&format!("order-{}", n));
    }

    let first = h
        .store
        .lease_pending(&LeaseRequest::new("a", 2, LEASE))
        .unwrap();
    let second = h
        .store
        .lease_pending(&LeaseRequest::new("b", 10, LEASE))
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 3);
    assert!(first
        .iter()
        .all(|record| second.iter().all(|other| other.id != record.id)));

    assert!(h
        .store
        .lease_pending(&LeaseRequest::new("c", 0, LEASE))
        .unwrap()
        .is_empty());
}

// ============================================================================
// Test 4: Marking is idempotent
// ============================================================================

#[test]
fn marks_on_terminal_records_are_ignored() {
    let h = Harness::new(5);
    let ids = h.place("order-1");
    h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    let published = h.record(ids[0]);
    assert!(published.is_published());

    let held = LeaseToken::new("relay-test", published.attempts);
    h.store.mark_published(ids[0], &held).unwrap();
    h.store.mark_failed(ids[0], &held, "late failure").unwrap();
    assert_eq!(h.record(ids[0]), published);

    h.broker.fail_next(DeliveryError::permanent("rejected"));
    h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    let failed = h.record(ids[1]);
    assert!(failed.is_failed());

    let held = LeaseToken::new("relay-test", failed.attempts);
    h.store.mark_failed(ids[1], &held, "again").unwrap();
    h.store.mark_published(ids[1], &held).unwrap();
    assert_eq!(h.record(ids[1]), failed);
}

// ============================================================================
// Test 5: Records of one aggregate publish in commit order
// ============================================================================

#[test]
fn head_of_line_failure_holds_back_the_aggregate() {
    let h = Harness::new(5);
    let placed = h.place("order-1");
    let added = h
        .coordinator
        .submit(
            &AddItem::new("order-1", "lamp"),
            vec![item_added_email("order-1", "lamp")],
        )
        .unwrap()
        .record_ids;
    let other = h.place("order-2");

    h.broker.fail_next(DeliveryError::transient("timeout"));
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();

    // order-2 is unaffected; order-1 waits behind its first record.
    assert!(other.iter().all(|id| h.record(*id).is_published()));
    assert_eq!(h.record(placed[0]).status, OutboxStatus::Pending);
    assert_eq!(h.record(placed[1]).status, OutboxStatus::Pending);
    assert_eq!(h.record(added[0]).status, OutboxStatus::Pending);
    assert_eq!(h.record(placed[1]).attempts, 0);

    h.skip_backoff();
    h.dispatcher.drain(Lane::GLOBAL, 10).unwrap();

    let queued: Vec<String> = h
        .broker
        .queue_messages(EMAIL_QUEUE)
        .into_iter()
        .filter(|envelope| envelope.aggregate_id == "order-1")
        .map(|envelope| envelope.message_id)
        .collect();
    assert_eq!(queued, vec![placed[0].to_string(), added[0].to_string()]);
    assert!(h.store.pending_records().unwrap().is_empty());
}

// ============================================================================
// Test 6: A lost mark leads to a republish, never a loss
// ============================================================================

#[test]
fn failed_mark_republishes_after_lease_expiry() {
    let h = Harness::new(5);
    let ids = h.place("order-1");
    h.store.fail_next_marks(1);

    let leased = h
        .store
        .lease_pending(&LeaseRequest::new("relay-test", 1, LEASE))
        .unwrap();
    assert_eq!(
        h.dispatcher.process_record(&leased[0]),
        RecordOutcome::Unconfirmed
    );
    assert_eq!(h.broker.queue_len(EMAIL_QUEUE), 1);
    assert!(h.record(ids[0]).is_in_flight());

    assert!(h.dispatcher.run_cycle(Lane::GLOBAL).unwrap().is_idle());

    h.clock.advance(LEASE);
    let report = h.dispatcher.run_cycle(Lane::GLOBAL).unwrap();
    assert_eq!(report.published, 1);

    let copies = h.broker.queue_messages(EMAIL_QUEUE);
    assert_eq!(copies.len(), 2);
    assert_eq!(copies[0].message_id, copies[1].message_id);
    assert!(h.record(ids[0]).is_published());
}

// ============================================================================
// Test 7: Lanes partition aggregates stably
// ============================================================================

#[test]
fn lanes_only_dispatch_their_own_aggregates() {
    let h = Harness::new(5);
    let orders: Vec<String> = (0..12).map(|n| format!("order-{}", n)).collect();
    for order in &orders {
        h.place(order);
    }

    for lane in Lane::all(3) {
        h.dispatcher.drain(lane, 50).unwrap();

        for order in &orders {
            let records = h.store.inner().records_for(order).unwrap();
            let route = Lane::route(order, 3);
            assert_eq!(route, Lane::route(order, 3));
            if route <= lane.index {
                assert!(records.iter().all(|record| record.is_published()), "{}", order);
            } else {
                assert!(records.iter().all(|record| record.is_pending()), "{}", order);
            }
        }
    }

    assert_eq!(h.broker.queue_len(EMAIL_QUEUE), 12);
    assert_eq!(h.broker.topic_log(EVENTS_TOPIC).len(), 12);
}

// ============================================================================
// Test 8: A worker whose lease was taken over cannot settle the record
// ============================================================================

#[test]
fn expired_lease_holder_cannot_settle_or_release() {
    let h = Harness::new(5);
    let ids = h.place("order-1");

    let first = h
        .store
        .lease_pending(&LeaseRequest::new("a", 10, LEASE))
        .unwrap();
    assert_eq!(first.len(), 1);
    let stale = LeaseToken::of(&first[0]).unwrap();

    h.clock.advance(LEASE);
    let second = h
        .store
        .lease_pending(&LeaseRequest::new("b", 10, LEASE))
        .unwrap();
    assert_eq!(second[0].id, ids[0]);
    assert_eq!(second[0].attempts, 2);
    let current = LeaseToken::of(&second[0]).unwrap();

    // A zero-delay release by "a" would hand the record to a third worker
    // while "b" is still publishing it.
    assert_eq!(
        h.store.schedule_retry(ids[0], &stale, "timeout", Duration::ZERO),
        Err(StoreError::LeaseLost(ids[0]))
    );
    assert_eq!(
        h.store.mark_failed(ids[0], &stale, "rejected"),
        Err(StoreError::LeaseLost(ids[0]))
    );
    assert!(h
        .store
        .lease_pending(&LeaseRequest::new("c", 10, LEASE))
        .unwrap()
        .is_empty());
    assert_eq!(h.record(ids[0]).leased_by.as_deref(), Some("b"));

    // The dispatcher reports the stale copy as unconfirmed and alerts nobody.
    h.broker.fail_next(DeliveryError::permanent("rejected"));
    assert_eq!(
        h.dispatcher.process_record(&first[0]),
        RecordOutcome::Unconfirmed
    );
    assert!(h.alerts.is_empty());
    assert!(h.record(ids[0]).is_in_flight());

    h.store.mark_published(ids[0], &current).unwrap();
    let published = h.record(ids[0]);
    assert!(published.is_published());
    assert_eq!(
        h.store.mark_failed(ids[0], &stale, "late"),
        Err(StoreError::LeaseLost(ids[0]))
    );
    assert_eq!(h.record(ids[0]), published);
}
