//! Order placement end to end: commit an order with its notifications,
//! dispatch them through lane threads, and consume the email queue twice to
//! show redelivery being deduplicated.
//!
//! Run with `RUST_LOG=outbox_relay=debug cargo run --example order_flow` for
//! per-record dispatch logs.

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use outbox_relay::delivery::Source;
use outbox_relay::idempotency::SweeperThread;
use outbox_relay::outbox::{EMAIL_QUEUE, EVENTS_TOPIC};
use outbox_relay::{
    DeliveryClient, DeliveryError, Destination, Dispatcher, DispatcherPool, Envelope,
    IdempotencyGuard, IdempotentConsumer, InMemoryBroker, InMemoryProcessedIds, InMemoryStore,
    Lane, LogTransport, Mutation, MutationError, NotificationSpec, OutboxStatus, OutboxStore,
    RelayConfig, TransactionCoordinator,
};

const CONFIG: &str = r#"{
    "dispatcher": {
        "worker_id": "demo-relay",
        "batch_size": 16,
        "lease_duration": "30s",
        "poll_interval": "20ms",
        "max_attempts": 5,
        "backoff_base": "10ms",
        "backoff_max": "200ms",
        "lanes": 2
    },
    "idempotency": {
        "retention": "1h",
        "sweep_interval": "30s"
    }
}"#;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Order {
    id: String,
    email: String,
    total_cents: u64,
}

struct PlaceOrder(Order);

impl Mutation for PlaceOrder {
    type State = Order;
    type Output = Order;

    fn aggregate_id(&self) -> &str {
        &self.0.id
    }

    fn apply(&self, state: &mut Order) -> Result<Order, MutationError> {
        if !state.id.is_empty() {
            return Err(MutationError::rejected("order already placed"));
        }
        *state = self.0.clone();
        Ok(state.clone())
    }
}

fn notifications(order: &Order) -> Vec<NotificationSpec> {
    vec![
        NotificationSpec::json(Destination::Queue, EMAIL_QUEUE, "order-created", order)
            .with_correlation_id(format!("checkout-{}", order.id)),
        NotificationSpec::domain_event(EVENTS_TOPIC, "order-created", order),
    ]
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_json_str(CONFIG)?;

    let store = InMemoryStore::new();
    let coordinator = TransactionCoordinator::new(store.clone());
    let broker = InMemoryBroker::new();
    let client = Arc::new(DeliveryClient::new(broker.clone()));

    let dispatcher = Arc::new(Dispatcher::from_config(
        store.clone(),
        Arc::clone(&client),
        &config.dispatcher,
    ));
    let pool = DispatcherPool::spawn(
        dispatcher,
        config.dispatcher.lanes,
        config.dispatcher.poll_interval,
    )?;

    // The first publish hits a broker hiccup and is retried after backoff.
    broker.fail_next(DeliveryError::transient("broker restarting"));

    let orders = [
        ("order-1001", "ada@example.com", 4_200),
        ("order-1002", "grace@example.com", 1_999),
        ("order-1003", "linus@example.com", 12_500),
    ];
    for (id, email, total_cents) in orders {
        let order = Order {
            id: id.to_string(),
            email: email.to_string(),
            total_cents,
        };
        let result = coordinator.submit(&PlaceOrder(order.clone()), notifications(&order))?;
        println!(
            "placed {} (version {}, {} outbox records)",
            result.output.id,
            result.version,
            result.record_ids.len()
        );
    }

    // Placing the same order twice is rejected and writes nothing.
    let duplicate = Order {
        id: "order-1001".into(),
        ..Order::default()
    };
    if let Err(err) = coordinator.submit(&PlaceOrder(duplicate.clone()), notifications(&duplicate)) {
        println!("second placement refused: {}", err);
    }

    let expected = orders.len() * 2;
    let deadline = Instant::now() + Duration::from_secs(5);
    while store.records_by_status(OutboxStatus::Published)?.len() < expected
        && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(10));
    }
    let stats = pool.stop();
    println!(
        "dispatcher: {} published, {} retried, {} failed over {} polls",
        stats.messages_published, stats.messages_retried, stats.messages_failed, stats.polls
    );

    let guard = Arc::new(IdempotencyGuard::from_config(
        InMemoryProcessedIds::new(),
        &config.idempotency,
    ));
    let sweeper = SweeperThread::spawn(Arc::clone(&guard), config.idempotency.sweep_interval)?;
    let consumer = IdempotentConsumer::new(Arc::clone(&client), Arc::clone(&guard));
    let email_queue = Source::queue(EMAIL_QUEUE);

    let send_confirmation = |envelope: &Envelope| -> Result<(), String> {
        let order: Order = envelope.decode_json().map_err(|e| e.to_string())?;
        println!(
            "  emailing {} about {} ({})",
            order.email,
            order.id,
            envelope.meta("correlation_id").unwrap_or("-")
        );
        Ok(())
    };

    println!("email worker, first pass:");
    let first = consumer.poll(&email_queue, send_confirmation)?;
    println!("  {:?}", first);

    // The broker redelivers the first email, e.g. after a lost ack.
    if let Some(first_email) = broker.acknowledged().first() {
        if let Some(record) = store
            .records_by_status(OutboxStatus::Published)?
            .iter()
            .find(|record| &record.id.to_string() == first_email)
        {
            broker.inject(Envelope::from(record));
        }
    }

    println!("email worker, redelivery:");
    let second = consumer.poll(&email_queue, send_confirmation)?;
    println!("  {:?}", second);

    let projections = consumer.poll(&Source::stream(EVENTS_TOPIC, "analytics"), |envelope| {
        println!("  analytics saw {} from {}", envelope.event_type, envelope.aggregate_id);
        Ok::<_, String>(())
    })?;
    println!("analytics group: {:?}", projections);

    let sweeps = sweeper.stop();
    println!("sweeper: {:?}", sweeps);
    client.shutdown();

    // Same records replayed through the logging transport.
    let lines = Arc::new(Mutex::new(Vec::new()));
    let replay_store = InMemoryStore::new();
    let replay = TransactionCoordinator::new(replay_store.clone());
    let order = Order {
        id: "order-2001".into(),
        email: "margaret@example.com".into(),
        total_cents: 800,
    };
    replay.submit(&PlaceOrder(order.clone()), notifications(&order))?;
    let log_dispatcher = Dispatcher::new(
        replay_store,
        DeliveryClient::new(LogTransport::with_buffer(Arc::clone(&lines))),
    )
    .with_worker_id("demo-log");
    log_dispatcher.drain(Lane::GLOBAL, 10)?;

    println!("log transport:");
    let lines = lines.lock().map_err(|_| "log buffer poisoned")?;
    for line in lines.iter() {
        println!("  {}", line);
    }

    Ok(())
}
