use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::ChannelPool;
use crate::codec::Codec;
use crate::config::ConsumerSettings;
use crate::publish::Publisher;
use crate::utils::error::QueueError;

use super::dispatcher::{DispatchConfig, Dispatcher};
use super::{ConsumerOptions, Handler};

/// Identifies an active subscription; returned by registration and used to
/// unregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub queue: String,
    pub consumer_tag: String,
}

struct Subscription {
    stop_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// Tracks active subscriptions and their dispatcher workers.
///
/// Invariant: at most one subscription per (queue, consumer tag) pair.
pub struct ConsumerRegistry {
    pool: Arc<ChannelPool>,
    codec: Arc<dyn Codec>,
    publisher: Arc<Publisher>,
    settings: ConsumerSettings,
    subscriptions: Mutex<HashMap<(String, String), Subscription>>,
}

impl ConsumerRegistry {
    pub fn new(
        pool: Arc<ChannelPool>,
        codec: Arc<dyn Codec>,
        publisher: Arc<Publisher>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            pool,
            codec,
            publisher,
            settings,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a handler for `queue` and starts its dispatcher worker.
    ///
    /// Fails only on invalid arguments; transient connectivity is handled
    /// inside the worker through the connection manager's retry path.
    pub fn register(
        &self,
        queue: &str,
        handler: Arc<dyn Handler>,
        options: ConsumerOptions,
    ) -> Result<SubscriptionHandle, QueueError> {
        if queue.trim().is_empty() {
            return Err(QueueError::invalid_argument("queue name must not be empty"));
        }
        let tag = options
            .consumer_tag
            .clone()
            .unwrap_or_else(|| format!("{}-{}", queue, Uuid::new_v4()));
        let key = (queue.to_string(), tag.clone());

        let mut subscriptions = self.subscriptions.lock().unwrap();
        if subscriptions.contains_key(&key) {
            return Err(QueueError::invalid_argument(format!(
                "consumer '{tag}' is already registered on queue '{queue}'"
            )));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let dispatcher = Dispatcher {
            config: DispatchConfig::resolve(queue, &tag, &options, &self.settings),
            handler,
            pool: self.pool.clone(),
            codec: self.codec.clone(),
            publisher: self.publisher.clone(),
            stop_rx,
        };
        let worker = tokio::spawn(dispatcher.run());
        subscriptions.insert(key, Subscription { stop_tx, worker });

        info!(queue, tag = %tag, "consumer registered");
        Ok(SubscriptionHandle {
            queue: queue.to_string(),
            consumer_tag: tag,
        })
    }

    /// Cancels future dispatch for the subscription, draining in-flight
    /// handler invocations within the configured grace period.
    pub async fn unregister(&self, handle: &SubscriptionHandle) -> Result<(), QueueError> {
        let subscription = self
            .subscriptions
            .lock()
            .unwrap()
            .remove(&(handle.queue.clone(), handle.consumer_tag.clone()))
            .ok_or_else(|| {
                QueueError::invalid_argument(format!(
                    "no subscription for '{}' on queue '{}'",
                    handle.consumer_tag, handle.queue
                ))
            })?;
        self.stop(subscription, &handle.queue, &handle.consumer_tag)
            .await;
        Ok(())
    }

    /// Drains every subscription. Used by `close()`.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.drain().collect()
        };
        for ((queue, tag), subscription) in drained {
            self.stop(subscription, &queue, &tag).await;
        }
    }

    async fn stop(&self, subscription: Subscription, queue: &str, tag: &str) {
        let _ = subscription.stop_tx.send(true);
        // The worker enforces the drain grace itself; the cushion only
        // covers a worker that is stuck outside its drain path.
        let cushion = self.settings.drain_grace() + Duration::from_secs(1);
        let mut worker = subscription.worker;
        if tokio::time::timeout(cushion, &mut worker).await.is_err() {
            warn!(queue, tag, "consumer worker did not stop in time; aborting");
            worker.abort();
        }
    }
}
