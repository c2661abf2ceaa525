//! The `service` module is the public face of the library: the
//! [`QueueService`] capability set (publish, register a consumer, close)
//! and [`QueueClient`], its implementation over a pluggable transport
//! chosen at construction time.

pub mod queue_client;

pub use queue_client::QueueClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::consume::{ConsumerOptions, Handler, SubscriptionHandle};
use crate::publish::{DeliveryResult, PublishOptions};
use crate::utils::error::QueueError;


/// The backend-agnostic queue service contract.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Encodes `payload`, builds a message and routes it to `queue`.
    async fn publish(
        &self,
        queue: &str,
        payload: Value,
        options: PublishOptions,
    ) -> Result<DeliveryResult, QueueError>;

    /// Registers a handler for `queue`; the returned handle unregisters it.
    async fn register_consumer(
        &self,
        queue: &str,
        handler: Arc<dyn Handler>,
        options: ConsumerOptions,
    ) -> Result<SubscriptionHandle, QueueError>;

    /// Cancels the subscription, draining in-flight handler invocations.
    async fn unregister_consumer(&self, handle: &SubscriptionHandle) -> Result<(), QueueError>;

    /// Releases all connections and channels. Idempotent; never errors.
    async fn close(&self);
}
