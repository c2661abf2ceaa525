use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::channel::ChannelPool;
use crate::codec::{Codec, JsonCodec};
use crate::config::{BrokerSettings, Settings};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::consume::{ConsumerOptions, ConsumerRegistry, Handler, SubscriptionHandle};
use crate::publish::{DeliveryResult, PublishOptions, Publisher};
use crate::transport::memory::MemoryTransport;
use crate::transport::{Endpoint, Transport};
use crate::utils::error::QueueError;

use super::QueueService;

impl From<&BrokerSettings> for Endpoint {
    fn from(broker: &BrokerSettings) -> Self {
        Self {
            host: broker.host.clone(),
            port: broker.port,
            virtual_host: broker.virtual_host.clone(),
            username: broker.username.clone(),
            password: broker.password.clone(),
        }
    }
}

/// The queue service over a transport chosen at construction time.
///
/// The connection is dialed lazily on the first publish or consume, or
/// eagerly through [`QueueClient::connect`].
pub struct QueueClient {
    manager: Arc<ConnectionManager>,
    publisher: Arc<Publisher>,
    pool: Arc<ChannelPool>,
    consumers: ConsumerRegistry,
    closed: AtomicBool,
}

impl QueueClient {
    /// Builds a client over any transport with the default JSON codec.
    pub fn with_transport(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self::with_codec(transport, Arc::new(JsonCodec), settings)
    }

    /// Builds a client over any transport and codec.
    pub fn with_codec(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        settings: Settings,
    ) -> Self {
        let endpoint = Endpoint::from(&settings.broker);
        let manager = Arc::new(ConnectionManager::new(transport, endpoint, &settings.retry));
        let pool = Arc::new(ChannelPool::new(
            manager.clone(),
            settings.broker.max_channels,
        ));
        let publisher = Arc::new(Publisher::new(
            pool.clone(),
            codec.clone(),
            settings.publisher.clone(),
        ));
        let consumers = ConsumerRegistry::new(
            pool.clone(),
            codec,
            publisher.clone(),
            settings.consumer.clone(),
        );
        Self {
            manager,
            publisher,
            pool,
            consumers,
            closed: AtomicBool::new(false),
        }
    }

    /// The in-memory variant: messages loop directly back to registered
    /// handlers without a network round trip.
    pub fn in_memory() -> Self {
        Self::in_memory_with(Settings::default())
    }

    pub fn in_memory_with(settings: Settings) -> Self {
        Self::with_transport(Arc::new(MemoryTransport::new()), settings)
    }

    /// The broker-backed variant over AMQP 0-9-1.
    #[cfg(feature = "amqp")]
    pub fn amqp(settings: Settings) -> Self {
        Self::with_transport(
            Arc::new(crate::transport::amqp::AmqpTransport::new()),
            settings,
        )
    }

    /// Dials the broker eagerly instead of waiting for the first operation.
    pub async fn connect(&self) -> Result<(), QueueError> {
        self.manager.connection().await.map(|_| ())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueService for QueueClient {
    async fn publish(
        &self,
        queue: &str,
        payload: Value,
        options: PublishOptions,
    ) -> Result<DeliveryResult, QueueError> {
        self.ensure_open()?;
        self.publisher.publish(queue, &payload, &options).await
    }

    async fn register_consumer(
        &self,
        queue: &str,
        handler: Arc<dyn Handler>,
        options: ConsumerOptions,
    ) -> Result<SubscriptionHandle, QueueError> {
        self.ensure_open()?;
        self.consumers.register(queue, handler, options)
    }

    async fn unregister_consumer(&self, handle: &SubscriptionHandle) -> Result<(), QueueError> {
        self.consumers.unregister(handle).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing queue service");
        self.consumers.close_all().await;
        self.manager.close().await;
        self.pool.clear();
    }
}
