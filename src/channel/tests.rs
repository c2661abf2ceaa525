use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::config::RetrySettings;
use crate::connection::ConnectionManager;
use crate::transport::memory::MemoryTransport;
use crate::transport::{
    Endpoint, Transport, TransportChannel, TransportConnection, TransportError,
};

use super::pool::ChannelPool;

fn fast_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        base_delay_ms: 1,
        multiplier: 1.0,
        max_delay_ms: 5,
        jitter: 0.0,
    }
}

fn test_endpoint() -> Endpoint {
    Endpoint {
        host: "localhost".to_string(),
        port: 5672,
        virtual_host: "/".to_string(),
        username: "guest".to_string(),
        password: "guest".to_string(),
    }
}

/// Counts opened channels on top of the in-memory transport.
struct CountingTransport {
    opened: Arc<AtomicU32>,
    inner: MemoryTransport,
}

struct CountingConnection {
    opened: Arc<AtomicU32>,
    inner: Box<dyn TransportConnection>,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, TransportError> {
        let inner = self.inner.connect(endpoint).await?;
        Ok(Box::new(CountingConnection {
            opened: self.opened.clone(),
            inner,
        }))
    }
}

#[async_trait]
impl TransportConnection for CountingConnection {
    async fn open_channel(&self) -> Result<Box<dyn TransportChannel>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open_channel().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

fn counting_pool(max_channels: usize) -> (ChannelPool, Arc<AtomicU32>) {
    let opened = Arc::new(AtomicU32::new(0));
    let transport = Arc::new(CountingTransport {
        opened: opened.clone(),
        inner: MemoryTransport::new(),
    });
    let manager = Arc::new(ConnectionManager::new(
        transport,
        test_endpoint(),
        &fast_retry(),
    ));
    (ChannelPool::new(manager, max_channels), opened)
}

#[tokio::test]
async fn checkin_makes_the_channel_reusable() {
    let (pool, opened) = counting_pool(4);

    let first = pool.checkout().await.unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    pool.checkin(first);

    let second = pool.checkout().await.unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 1, "idle channel not reused");
    pool.checkin(second);
}

#[tokio::test]
async fn stale_generation_channels_are_discarded() {
    let (pool, opened) = counting_pool(4);

    let first = pool.checkout().await.unwrap();
    let generation = first.generation;
    pool.checkin(first);

    // Simulate a connection failure; the pooled channel is now stale.
    pool.manager().invalidate(generation).await;

    let fresh = pool.checkout().await.unwrap();
    assert_eq!(fresh.generation, generation + 1);
    assert_eq!(opened.load(Ordering::SeqCst), 2, "stale channel was reused");
}

#[tokio::test]
async fn checkout_blocks_at_the_channel_limit() {
    let (pool, _) = counting_pool(1);
    let pool = Arc::new(pool);

    let held = pool.checkout().await.unwrap();

    let contender = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.checkout().await })
    };
    // The second checkout cannot complete while the only permit is held.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!contender.is_finished());

    drop(held); // frees the permit
    let second = contender.await.unwrap().unwrap();
    drop(second);
}

#[tokio::test]
async fn dedicated_checkout_ignores_the_channel_limit() {
    let (pool, opened) = counting_pool(1);

    // The only permit is taken; a dedicated checkout must still complete.
    let held = pool.checkout().await.unwrap();
    let dedicated = pool.checkout_dedicated().await.unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 2);

    // And a dedicated channel returns no permit on checkin.
    pool.checkin(dedicated);
    let contender = {
        let pool = Arc::new(pool);
        let pool_for_task = pool.clone();
        tokio::spawn(async move { pool_for_task.checkout().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!contender.is_finished(), "the operation limit was bypassed");

    drop(held);
    contender.await.unwrap().unwrap();
}

#[tokio::test]
async fn checkout_after_close_is_cancelled() {
    let (pool, _) = counting_pool(2);
    pool.manager().close().await;
    let err = pool.checkout().await.err().unwrap();
    assert!(matches!(err, crate::utils::error::QueueError::Cancelled));
}
