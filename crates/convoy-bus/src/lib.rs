//! Message bus client for the Convoy task mesh.
//!
//! A thin layer over an AMQP-compatible broker: connect once, declare the
//! shared topology idempotently, publish JSON bytes, consume deliveries and
//! acknowledge them explicitly.
//!
//! # Main types
//!
//! - [`MessageBus`]: Trait every bus backend implements.
//! - [`AmqpBus`]: lapin-backed client for RabbitMQ and compatible brokers.
//! - [`InMemoryBus`]: Single-process broker with the same routing semantics.
//! - [`Delivery`]: One consumed message awaiting `ack`/`nack`.

/// lapin-backed AMQP client.
pub mod amqp;
/// The bus trait and delivery types.
pub mod bus;
/// In-process broker.
pub mod memory;
/// Exchange, queue and routing-key conventions.
pub mod topology;

pub use amqp::AmqpBus;
pub use bus::{
    publish_json, Acknowledger, BusConfig, Delivery, DeliveryStream, ExchangeKind, MessageBus,
    QueueOptions,
};
pub use memory::{InMemoryBus, PublishedMessage};
pub use topology::{declare_dead_letter, declare_shared_exchanges, routing_key_matches};
