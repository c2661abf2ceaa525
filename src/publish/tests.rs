use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::channel::ChannelPool;
use crate::codec::JsonCodec;
use crate::config::{PublisherSettings, RetrySettings};
use crate::connection::ConnectionManager;
use crate::transport::memory::MemoryTransport;
use crate::transport::{
    Delivery, Endpoint, Message, Transport, TransportChannel, TransportConnection, TransportError,
};
use crate::utils::error::QueueError;

use super::publisher::{PublishOptions, Publisher};

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

fn memory_publisher() -> (Publisher, MemoryTransport) {
    let transport = MemoryTransport::new();
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(transport.clone()),
        test_endpoint(),
        &fast_retry(),
    ));
    let pool = Arc::new(ChannelPool::new(manager, 4));
    let publisher = Publisher::new(
        pool,
        Arc::new(JsonCodec),
        PublisherSettings {
            retries: 3,
            require_ack: false,
        },
    );
    (publisher, transport)
}

/// Never connects; counts dial attempts.
struct UnreachableTransport {
    dials: Arc<AtomicU32>,
}

#[async_trait]
impl Transport for UnreachableTransport {
    async fn connect(
        &self,
        _endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Unavailable("no route to broker".into()))
    }
}

/// Connects fine but every send fails with the configured error.
struct SendFailTransport {
    sends: Arc<AtomicU32>,
    auth: bool,
}

struct SendFailConnection {
    sends: Arc<AtomicU32>,
    auth: bool,
}

struct SendFailChannel {
    sends: Arc<AtomicU32>,
    auth: bool,
}

#[async_trait]
impl Transport for SendFailTransport {
    async fn connect(
        &self,
        _endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, TransportError> {
        Ok(Box::new(SendFailConnection {
            sends: self.sends.clone(),
            auth: self.auth,
        }))
    }
}

#[async_trait]
impl TransportConnection for SendFailConnection {
    async fn open_channel(&self) -> Result<Box<dyn TransportChannel>, TransportError> {
        Ok(Box::new(SendFailChannel {
            sends: self.sends.clone(),
            auth: self.auth,
        }))
    }

    async fn close(&self) {}
}

#[async_trait]
impl TransportChannel for SendFailChannel {
    async fn send(&self, _message: &Message, _require_ack: bool) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.auth {
            Err(TransportError::AccessRefused("not allowed".into()))
        } else {
            Err(TransportError::Unavailable("broker hiccup".into()))
        }
    }

    async fn consume(
        &self,
        _queue: &str,
        _consumer_tag: &str,
        _prefetch: u16,
    ) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        Err(TransportError::Unavailable("not a consumer".into()))
    }

    async fn cancel(&self, _consumer_tag: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

fn failing_publisher(auth: bool) -> (Publisher, Arc<AtomicU32>) {
    let sends = Arc::new(AtomicU32::new(0));
    let transport = Arc::new(SendFailTransport {
        sends: sends.clone(),
        auth,
    });
    let manager = Arc::new(ConnectionManager::new(
        transport,
        test_endpoint(),
        &fast_retry(),
    ));
    let pool = Arc::new(ChannelPool::new(manager, 4));
    let publisher = Publisher::new(
        pool,
        Arc::new(JsonCodec),
        PublisherSettings {
            retries: 3,
            require_ack: false,
        },
    );
    (publisher, sends)
}

#[tokio::test]
async fn publish_rejects_empty_queue_name() {
    let (publisher, _) = memory_publisher();
    let err = publisher
        .publish("", &json!({"x": 1}), &PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidArgument { .. }));

    let err = publisher
        .publish("   ", &json!({"x": 1}), &PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidArgument { .. }));
}

#[tokio::test]
async fn publish_delivers_to_the_transport() {
    let (publisher, transport) = memory_publisher();

    let result = publisher
        .publish("work", &json!({"job": 42}), &PublishOptions::default())
        .await
        .unwrap();
    assert!(result.is_delivered());
    assert!(!result.message_id.is_empty());

    // Read the message back straight off the transport.
    let conn = transport.connect(&test_endpoint()).await.unwrap();
    let channel = conn.open_channel().await.unwrap();
    let mut deliveries = channel.consume("work", "inspector", 1).await.unwrap();
    let delivery = deliveries.recv().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&delivery.message.body).unwrap();
    assert_eq!(body, json!({"job": 42}));
    assert!(delivery.message.properties.persistent);
    delivery.ack().await;
}

#[tokio::test]
async fn publish_preserves_call_order_per_queue() {
    let (publisher, transport) = memory_publisher();

    for n in 1..=3 {
        let result = publisher
            .publish("ordered", &json!({"n": n}), &PublishOptions::default())
            .await
            .unwrap();
        assert!(result.is_delivered());
    }

    let conn = transport.connect(&test_endpoint()).await.unwrap();
    let channel = conn.open_channel().await.unwrap();
    let mut deliveries = channel.consume("ordered", "inspector", 3).await.unwrap();
    for expected in 1..=3 {
        let delivery = deliveries.recv().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&delivery.message.body).unwrap();
        assert_eq!(body["n"], expected);
        delivery.ack().await;
    }
}

#[tokio::test]
async fn unreachable_broker_raises_after_the_dial_budget() {
    let dials = Arc::new(AtomicU32::new(0));
    let transport = Arc::new(UnreachableTransport {
        dials: dials.clone(),
    });
    let manager = Arc::new(ConnectionManager::new(
        transport,
        test_endpoint(),
        &fast_retry(),
    ));
    let pool = Arc::new(ChannelPool::new(manager, 4));
    let publisher = Publisher::new(
        pool,
        Arc::new(JsonCodec),
        PublisherSettings {
            retries: 3,
            require_ack: false,
        },
    );

    let err = publisher
        .publish("jobs", &json!("payload"), &PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Connection { attempts: 3, .. }));
    // The dial budget is the connection manager's, not multiplied by the
    // publisher's own retry loop.
    assert_eq!(dials.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transient_send_failures_return_a_failed_result() {
    let (publisher, sends) = failing_publisher(false);

    let result = publisher
        .publish("doomed", &json!("payload"), &PublishOptions::default())
        .await
        .unwrap();
    assert!(!result.is_delivered());
    assert!(matches!(
        result.error,
        Some(QueueError::Connection { attempts: 3, .. })
    ));
    assert_eq!(sends.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn auth_failure_on_send_is_raised_not_wrapped() {
    let (publisher, sends) = failing_publisher(true);

    let err = publisher
        .publish("doomed", &json!("payload"), &PublishOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Authentication { .. }));
    assert_eq!(sends.load(Ordering::SeqCst), 1);
}
