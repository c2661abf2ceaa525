use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::channel::ChannelPool;
use crate::codec::Codec;
use crate::config::PublisherSettings;
use crate::transport::{Message, MessageProperties};
use crate::utils::error::QueueError;

/// Per-call publish options.
///
/// `persistent` defaults to on, matching the original service which always
/// published with the durable delivery mode. `require_ack` makes the call
/// await the broker's publisher confirm; the configured publisher default
/// can also force it on.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub require_ack: bool,
    pub persistent: bool,
    pub correlation_id: Option<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            require_ack: false,
            persistent: true,
            correlation_id: None,
        }
    }
}

/// Outcome of a publish call.
///
/// A transient failure that exhausts the retry budget comes back as a
/// result carrying the last error instead of an `Err`, so callers can
/// batch-inspect outcomes.
#[derive(Debug)]
pub struct DeliveryResult {
    pub queue: String,
    pub message_id: String,
    /// True when the broker confirmed the publish (`require_ack` path).
    pub confirmed: bool,
    pub error: Option<QueueError>,
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Sends messages through pooled channels.
///
/// For a single `Publisher` and a single queue, messages reach the
/// transport in the order `publish` was called: the send lock serializes
/// the whole send critical section and tokio mutexes queue waiters fairly.
pub struct Publisher {
    pool: Arc<ChannelPool>,
    codec: Arc<dyn Codec>,
    settings: PublisherSettings,
    send_lock: tokio::sync::Mutex<()>,
}

impl Publisher {
    pub fn new(pool: Arc<ChannelPool>, codec: Arc<dyn Codec>, settings: PublisherSettings) -> Self {
        Self {
            pool,
            codec,
            settings,
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn publish(
        &self,
        queue: &str,
        payload: &Value,
        options: &PublishOptions,
    ) -> Result<DeliveryResult, QueueError> {
        if queue.trim().is_empty() {
            return Err(QueueError::invalid_argument("queue name must not be empty"));
        }

        let body = self.codec.encode(payload)?;
        let properties = MessageProperties::new(
            options.persistent,
            options.correlation_id.clone(),
            self.codec.content_type(),
        );
        let message_id = properties.message_id.clone();
        let message = Message {
            queue: queue.to_string(),
            body,
            properties,
        };
        let require_ack = options.require_ack || self.settings.require_ack;

        let _ordered = self.send_lock.lock().await;

        let retries = self.settings.retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=retries {
            let pooled = self.pool.checkout().await?;
            match pooled.channel.send(&message, require_ack).await {
                Ok(()) => {
                    self.pool.checkin(pooled);
                    debug!(queue, %message_id, attempt, "message published");
                    return Ok(DeliveryResult {
                        queue: queue.to_string(),
                        message_id,
                        confirmed: require_ack,
                        error: None,
                    });
                }
                Err(err) if err.is_auth() => {
                    self.pool.invalidate(pooled).await;
                    return Err(QueueError::Authentication {
                        message: err.to_string(),
                    });
                }
                Err(err) if err.is_transient() => {
                    warn!(queue, attempt, retries, error = %err, "publish attempt failed");
                    last_error = err.to_string();
                    self.pool.invalidate(pooled).await;
                }
                Err(err) => {
                    last_error = err.to_string();
                    self.pool.invalidate(pooled).await;
                    break;
                }
            }
        }

        error!(queue, %message_id, "publish retries exhausted");
        Ok(DeliveryResult {
            queue: queue.to_string(),
            message_id,
            confirmed: false,
            error: Some(QueueError::Connection {
                attempts: retries,
                message: last_error,
            }),
        })
    }
}
