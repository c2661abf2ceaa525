use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelPool;
use crate::codec::Codec;
use crate::config::ConsumerSettings;
use crate::publish::{PublishOptions, Publisher};
use crate::transport::Delivery;
use crate::utils::error::QueueError;

use super::{ConsumerOptions, Handler};

/// Pause before re-establishing a consume stream after a failure. The
/// connection manager applies its own backoff underneath; this only keeps
/// a repeatedly exhausted budget from hot-looping.
const RESUBSCRIBE_PAUSE: Duration = Duration::from_millis(500);

/// Subscription options resolved against the configured defaults.
pub(crate) struct DispatchConfig {
    pub queue: String,
    pub tag: String,
    pub prefetch: u16,
    pub ack_timeout: Duration,
    pub redelivery_limit: u32,
    pub dead_letter: Option<String>,
    pub drain_grace: Duration,
}

impl DispatchConfig {
    pub fn resolve(
        queue: &str,
        tag: &str,
        options: &ConsumerOptions,
        settings: &ConsumerSettings,
    ) -> Self {
        Self {
            queue: queue.to_string(),
            tag: tag.to_string(),
            prefetch: options.prefetch.unwrap_or(settings.prefetch).max(1),
            ack_timeout: options.ack_timeout.unwrap_or_else(|| settings.ack_timeout()),
            redelivery_limit: options.redelivery_limit.unwrap_or(settings.redelivery_limit),
            dead_letter: options
                .dead_letter_queue
                .clone()
                .or_else(|| settings.dead_letter_queue.clone()),
            drain_grace: settings.drain_grace(),
        }
    }
}

enum Pump {
    Stopped,
    StreamEnded,
}

/// The worker behind one subscription.
///
/// Establishes the consume stream (retrying transparently, so registration
/// never fails on transient connectivity), gates dispatch on the prefetch
/// window, and runs each delivery through the handler on its own task.
pub(crate) struct Dispatcher {
    pub config: DispatchConfig,
    pub handler: Arc<dyn Handler>,
    pub pool: Arc<ChannelPool>,
    pub codec: Arc<dyn Codec>,
    pub publisher: Arc<Publisher>,
    pub stop_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    pub async fn run(mut self) {
        let inflight = Arc::new(Semaphore::new(self.config.prefetch as usize));
        let mut handlers = JoinSet::new();

        'outer: while !*self.stop_rx.borrow() {
            // Dedicated: the stream holds its channel for the whole
            // subscription, outside the operation-channel limit.
            let pooled = match self.pool.checkout_dedicated().await {
                Ok(pooled) => pooled,
                Err(QueueError::Cancelled) => break,
                Err(err) => {
                    warn!(
                        queue = %self.config.queue,
                        error = %err,
                        "consumer could not reach broker; will retry"
                    );
                    if self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            let mut deliveries = match pooled
                .channel
                .consume(&self.config.queue, &self.config.tag, self.config.prefetch)
                .await
            {
                Ok(rx) => rx,
                Err(err) => {
                    warn!(
                        queue = %self.config.queue,
                        tag = %self.config.tag,
                        error = %err,
                        "consume setup failed; will retry"
                    );
                    if err.is_transient() {
                        self.pool.invalidate(pooled).await;
                    }
                    if self.pause().await {
                        break;
                    }
                    continue;
                }
            };
            info!(queue = %self.config.queue, tag = %self.config.tag, "consumer subscribed");

            let outcome = self.pump(&mut handlers, &inflight, &mut deliveries).await;
            let _ = pooled.channel.cancel(&self.config.tag).await;
            drop(pooled);

            match outcome {
                Pump::Stopped => break 'outer,
                Pump::StreamEnded => {
                    warn!(queue = %self.config.queue, "delivery stream ended; resubscribing");
                }
            }
        }

        self.drain(handlers).await;
    }

    async fn pump(
        &mut self,
        handlers: &mut JoinSet<()>,
        inflight: &Arc<Semaphore>,
        deliveries: &mut mpsc::Receiver<Delivery>,
    ) -> Pump {
        loop {
            // Reap finished handler tasks as we go.
            while handlers.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = self.stop_rx.changed() => return Pump::Stopped,
                permit = inflight.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Pump::Stopped,
                },
            };

            let delivery = tokio::select! {
                _ = self.stop_rx.changed() => return Pump::Stopped,
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => return Pump::StreamEnded,
                },
            };

            let context = HandlerContext {
                queue: self.config.queue.clone(),
                ack_timeout: self.config.ack_timeout,
                redelivery_limit: self.config.redelivery_limit,
                dead_letter: self.config.dead_letter.clone(),
                handler: self.handler.clone(),
                codec: self.codec.clone(),
                publisher: self.publisher.clone(),
            };
            handlers.spawn(async move {
                context.handle(delivery).await;
                drop(permit);
            });
        }
    }

    /// Sleeps for the resubscribe pause. Returns true when stopped meanwhile.
    async fn pause(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(RESUBSCRIBE_PAUSE) => false,
            _ = self.stop_rx.changed() => true,
        }
    }

    async fn drain(&self, mut handlers: JoinSet<()>) {
        if handlers.is_empty() {
            return;
        }
        let grace = self.config.drain_grace;
        let drained = tokio::time::timeout(grace, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                queue = %self.config.queue,
                tag = %self.config.tag,
                grace_secs = grace.as_secs(),
                "drain grace exceeded; aborting in-flight handlers"
            );
            handlers.abort_all();
        }
    }
}

struct HandlerContext {
    queue: String,
    ack_timeout: Duration,
    redelivery_limit: u32,
    dead_letter: Option<String>,
    handler: Arc<dyn Handler>,
    codec: Arc<dyn Codec>,
    publisher: Arc<Publisher>,
}

impl HandlerContext {
    async fn handle(self, delivery: Delivery) {
        let attempt = delivery.attempt;
        let payload = match self.codec.decode(&delivery.message.body) {
            Ok(payload) => payload,
            Err(err) => {
                // A body we cannot decode will never decode; requeueing would loop.
                error!(queue = %self.queue, error = %err, "dropping message with undecodable body");
                delivery.nack(false).await;
                return;
            }
        };

        match tokio::time::timeout(self.ack_timeout, self.handler.handle(payload.clone())).await {
            Ok(Ok(())) => {
                delivery.ack().await;
                debug!(queue = %self.queue, attempt, "message acknowledged");
            }
            Ok(Err(err)) => self.reject(delivery, payload, err.to_string()).await,
            Err(_) => {
                let reason = format!("handler timed out after {:?}", self.ack_timeout);
                self.reject(delivery, payload, reason).await;
            }
        }
    }

    async fn reject(self, delivery: Delivery, payload: Value, reason: String) {
        warn!(
            queue = %self.queue,
            attempt = delivery.attempt,
            %reason,
            "handler failed"
        );

        if delivery.attempt <= self.redelivery_limit {
            delivery.nack(true).await;
            return;
        }

        match &self.dead_letter {
            Some(target) => {
                let options = PublishOptions::default();
                match self.publisher.publish(target, &payload, &options).await {
                    Ok(result) if result.is_delivered() => {
                        info!(queue = %self.queue, target = %target, "message dead-lettered");
                        delivery.ack().await;
                    }
                    Ok(_) | Err(_) => {
                        warn!(
                            queue = %self.queue,
                            target = %target,
                            "dead-letter publish failed; requeueing"
                        );
                        delivery.nack(true).await;
                    }
                }
            }
            None => {
                error!(
                    queue = %self.queue,
                    attempt = delivery.attempt,
                    "redelivery limit reached and no dead-letter target; dropping message"
                );
                delivery.nack(false).await;
            }
        }
    }
}
