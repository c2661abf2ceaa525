//! The `transport` module is the wire boundary of the queue service.
//!
//! It defines the message envelope exchanged with the broker and the
//! `Transport` trait family behind which the actual protocol lives. The
//! retry and dispatch layers above only ever speak to these traits, so a
//! backend can be swapped at construction time: the `memory` backend loops
//! messages straight back to registered consumers for tests, while the
//! `amqp` backend (feature `amqp`) talks AMQP 0-9-1 through `lapin`.

pub mod memory;
pub mod message;

#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg(feature = "amqp")]
pub use amqp::AmqpTransport;
pub use memory::MemoryTransport;
pub use message::{AckSink, Delivery, Message, MessageProperties};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;


/// Broker endpoint supplied at service construction.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
}

/// Failures raised at the transport seam.
///
/// The connection and publish layers branch on the classification:
/// transient kinds are retried, access refusals are surfaced immediately
/// and never retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io failure: {0}")]
    Io(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("access refused by broker: {0}")]
    AccessRefused(String),

    #[error("connection closed")]
    Closed,

    #[error("queue '{0}' already has an active consumer")]
    ConsumerConflict(String),
}

impl TransportError {
    /// Transient faults are worth a reconnect-and-retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::Unavailable(_) | TransportError::Closed
        )
    }

    /// Authentication / authorization failures. Fatal, never retried.
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::AccessRefused(_))
    }
}

/// Dials broker endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// A live session with the broker, over which channels are multiplexed.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn TransportChannel>, TransportError>;

    /// Closes the session. Errors are logged by implementations, not surfaced.
    async fn close(&self);
}

/// A logical session used for one operation at a time.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Sends a message to its queue. With `require_ack` the call resolves
    /// only once the broker has confirmed the publish.
    async fn send(&self, message: &Message, require_ack: bool) -> Result<(), TransportError>;

    /// Starts delivering messages from `queue` into the returned channel.
    /// The channel is bounded by the prefetch window, so an unread window
    /// pauses delivery at the transport.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<mpsc::Receiver<Delivery>, TransportError>;

    /// Stops the consumer registered under `consumer_tag`.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError>;
}
