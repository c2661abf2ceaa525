use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::connection::ConnectionManager;
use crate::transport::TransportChannel;
use crate::utils::error::QueueError;

/// A channel checked out of the pool, tagged with the connection
/// generation that produced it. The permit bounds the number of
/// short-lived operation channels in use at once and travels with the
/// channel until checkin or drop; dedicated channels carry none.
pub struct PooledChannel {
    pub channel: Box<dyn TransportChannel>,
    pub generation: u64,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Pool of idle channels over the managed connection.
///
/// Checkout/return is the only mutation point; the idle vector is behind a
/// mutex and never held across an await. Idle channels hold no permit, so
/// the limit counts channels actually in use.
pub struct ChannelPool {
    manager: Arc<ConnectionManager>,
    idle: Mutex<Vec<(Box<dyn TransportChannel>, u64)>>,
    limit: Arc<Semaphore>,
}

impl ChannelPool {
    pub fn new(manager: Arc<ConnectionManager>, max_channels: usize) -> Self {
        Self {
            manager,
            idle: Mutex::new(Vec::new()),
            limit: Arc::new(Semaphore::new(max_channels.max(1))),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Checks out a channel for one operation, reusing an idle one of the
    /// current generation or opening a new one. A transient open failure
    /// invalidates the connection and retries once through the manager's
    /// reconnect path.
    pub async fn checkout(&self) -> Result<PooledChannel, QueueError> {
        let permit = self
            .limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| QueueError::Cancelled)?;
        self.open(Some(permit)).await
    }

    /// Checks out a channel outside the pool limit. For subscription
    /// streams, which hold their channel for the subscription's lifetime:
    /// counting those against the limit would let consumers starve every
    /// publish, dead-letter publishes included.
    pub async fn checkout_dedicated(&self) -> Result<PooledChannel, QueueError> {
        self.open(None).await
    }

    async fn open(
        &self,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<PooledChannel, QueueError> {
        let mut reconnected = false;
        loop {
            let (conn, generation) = self.manager.connection().await?;

            if permit.is_some() {
                if let Some(channel) = self.pop_idle(generation) {
                    return Ok(PooledChannel {
                        channel,
                        generation,
                        _permit: permit,
                    });
                }
            }

            match conn.open_channel().await {
                Ok(channel) => {
                    return Ok(PooledChannel {
                        channel,
                        generation,
                        _permit: permit,
                    });
                }
                Err(err) if err.is_transient() && !reconnected => {
                    warn!(error = %err, "channel open failed; reconnecting");
                    reconnected = true;
                    self.manager.invalidate(generation).await;
                }
                Err(err) if err.is_auth() => {
                    return Err(QueueError::Authentication {
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    return Err(QueueError::Connection {
                        attempts: 1,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    /// Returns a healthy channel to the pool, releasing its permit.
    /// Dedicated channels are simply dropped.
    pub fn checkin(&self, pooled: PooledChannel) {
        if self.manager.is_closed() || pooled._permit.is_none() {
            return;
        }
        self.idle
            .lock()
            .unwrap()
            .push((pooled.channel, pooled.generation));
    }

    /// Drops a channel that failed an operation and invalidates the
    /// connection it came from so the next checkout redials.
    pub async fn invalidate(&self, pooled: PooledChannel) {
        let generation = pooled.generation;
        drop(pooled);
        self.manager.invalidate(generation).await;
    }

    /// Releases every idle channel. Called on close.
    pub fn clear(&self) {
        self.idle.lock().unwrap().clear();
    }

    fn pop_idle(&self, generation: u64) -> Option<Box<dyn TransportChannel>> {
        let mut idle = self.idle.lock().unwrap();
        while let Some((channel, channel_generation)) = idle.pop() {
            if channel_generation == generation {
                return Some(channel);
            }
            // Stale channel from a previous connection; drop it.
        }
        None
    }
}
