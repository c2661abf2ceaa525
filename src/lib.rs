//! # relayq
//!
//! `relayq` is a reliable queue-service abstraction for message brokers:
//! publish, register consumers, close. The retry and dispatch contract is
//! implemented once, over a pluggable transport, so the same code runs
//! against an AMQP broker in production and an in-memory loopback in
//! tests.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `service`: the public facade, `QueueClient` and the `QueueService` contract.
//! - `connection`: connection lifecycle, reconnect with jittered backoff, single-flight dialing.
//! - `channel`: the pool of logical sessions multiplexed over the connection.
//! - `publish`: the ordered, retrying publisher with optional publisher confirms.
//! - `consume`: consumer registry and dispatcher, with prefetch backpressure,
//!   redelivery limits and dead-letter routing.
//! - `transport`: the wire boundary and its backends (in-memory, AMQP).
//! - `codec`: the serialization boundary (JSON by default).
//! - `config`: handles loading and managing configuration.
//! - `utils`: shared utilities, such as error types and logging setup.

pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod consume;
pub mod publish;
pub mod service;
pub mod transport;
pub mod utils;

pub use codec::{Codec, JsonCodec};
pub use config::{Settings, load_config};
pub use connection::ConnectionState;
pub use consume::{ConsumerOptions, Handler, HandlerError, SubscriptionHandle, handler_fn};
pub use publish::{DeliveryResult, PublishOptions};
pub use service::{QueueClient, QueueService};
pub use utils::error::QueueError;

#[cfg(test)]
mod tests;
