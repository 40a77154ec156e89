//! Delivery Client Adapter - publishing to queues and event streams.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              DeliveryClient (one per process)               │
//! │  - lazily opened shared connection                          │
//! │  - reconnect after transient failure, shutdown()            │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Transport Trait                        │
//! │  connect() / publish(conn, envelope) / consume() / close()  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────────┐
//! │InMemoryBroker│   │ LogTransport │   │ AMQP / Kafka client │
//! │  (included)  │   │  (included)  │   │     (external)      │
//! └──────────────┘   └──────────────┘   └─────────────────────┘
//! ```

mod client;
mod envelope;
mod error;
mod in_memory_broker;
mod log_transport;
mod transport;

pub use client::DeliveryClient;
pub use envelope::Envelope;
pub use error::DeliveryError;
pub use in_memory_broker::{BrokerConnection, InMemoryBroker};
pub use log_transport::LogTransport;
pub use transport::{Ack, Disposition, Publisher, Source, Transport};
