//! The `consume` module manages subscriptions and dispatches incoming
//! messages to registered handlers: per-subscription workers, a prefetch
//! window for backpressure, acknowledgement timeouts, redelivery limits
//! and dead-letter routing.

pub mod dispatcher;
pub mod registry;

pub use registry::{ConsumerRegistry, SubscriptionHandle};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;


/// Error type handlers report back to the dispatcher.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A message handler registered for a queue.
///
/// A returned error (or exceeding the ack timeout) negatively acknowledges
/// the delivery; the dispatcher then requeues, dead-letters or drops it
/// according to the subscription's options.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, payload: Value) -> Result<(), HandlerError> {
        (self.0)(payload).await
    }
}

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Per-subscription options. Unset fields fall back to the configured
/// consumer defaults.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub consumer_tag: Option<String>,
    pub prefetch: Option<u16>,
    pub ack_timeout: Option<Duration>,
    pub redelivery_limit: Option<u32>,
    pub dead_letter_queue: Option<String>,
}
