use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use async_trait::async_trait;

/// Properties attached to a published message.
///
/// `persistent` maps to the broker's durable delivery mode; `message_id`
/// and `created_at` are filled in at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageProperties {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub persistent: bool,
    pub content_type: String,
    /// Unix timestamp in milliseconds at which the envelope was built.
    pub created_at: i64,
}

impl MessageProperties {
    pub fn new(persistent: bool, correlation_id: Option<String>, content_type: &str) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            correlation_id,
            persistent,
            content_type: content_type.to_string(),
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

/// An immutable message envelope: a routing key (queue name), the encoded
/// payload and its properties. Built by the publisher, decoded again on the
/// consumer side; never mutated in between.
#[derive(Debug, Clone)]
pub struct Message {
    pub queue: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

/// Backend-specific acknowledgement sink behind a [`Delivery`].
#[async_trait]
pub trait AckSink: Send + Sync {
    async fn ack(self: Box<Self>);
    async fn nack(self: Box<Self>, requeue: bool);
}

/// A message received from the transport, together with its delivery
/// attempt number (1 for the first delivery) and a consuming ack handle.
pub struct Delivery {
    pub message: Message,
    pub attempt: u32,
    sink: Option<Box<dyn AckSink>>,
}

impl Delivery {
    pub fn new(message: Message, attempt: u32, sink: Box<dyn AckSink>) -> Self {
        Self {
            message,
            attempt,
            sink: Some(sink),
        }
    }

    /// Acknowledges the delivery, removing the message from the queue.
    pub async fn ack(mut self) {
        if let Some(sink) = self.sink.take() {
            sink.ack().await;
        }
    }

    /// Negatively acknowledges the delivery. With `requeue` the message goes
    /// back to the queue for another attempt; without it the message is
    /// discarded by the backend.
    pub async fn nack(mut self, requeue: bool) {
        if let Some(sink) = self.sink.take() {
            sink.nack(requeue).await;
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("attempt", &self.attempt)
            .finish()
    }
}
