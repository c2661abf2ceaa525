//! AMQP 0-9-1 transport backend built on `lapin`.
//!
//! Behavior mirrors the operational choices of the original service:
//! queues are declared durable before use, persistent messages are sent
//! with delivery mode 2, consumers set a prefetch window through
//! `basic_qos` and acknowledge through `basic_ack`/`basic_nack`. Channels
//! are put in confirm mode so publisher confirms are available whenever a
//! caller asks for them.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, ConnectionProperties};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::message::{AckSink, Delivery, Message, MessageProperties};
use super::{Endpoint, Transport, TransportChannel, TransportConnection, TransportError};

/// AMQP backend. Stateless; all state lives on the dialed connection.
#[derive(Debug, Clone, Default)]
pub struct AmqpTransport;

impl AmqpTransport {
    pub fn new() -> Self {
        Self
    }
}

fn amqp_uri(endpoint: &Endpoint) -> String {
    let vhost = if endpoint.virtual_host == "/" {
        "%2f".to_string()
    } else {
        endpoint.virtual_host.clone()
    };
    format!(
        "amqp://{}:{}@{}:{}/{}",
        endpoint.username, endpoint.password, endpoint.host, endpoint.port, vhost
    )
}

fn classify(err: lapin::Error) -> TransportError {
    let text = err.to_string();
    match &err {
        lapin::Error::IOError(_) => TransportError::Io(text),
        lapin::Error::InvalidConnectionState(_) | lapin::Error::InvalidChannelState(_) => {
            TransportError::Closed
        }
        lapin::Error::ProtocolError(_) => {
            // 403 ACCESS-REFUSED covers bad credentials and vhost permissions.
            if text.contains("ACCESS-REFUSED") || text.contains("ACCESS_REFUSED") {
                TransportError::AccessRefused(text)
            } else {
                TransportError::Unavailable(text)
            }
        }
        _ => TransportError::Unavailable(text),
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, TransportError> {
        let uri = amqp_uri(endpoint);
        let connection = lapin::Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(classify)?;
        debug!(host = %endpoint.host, port = endpoint.port, "amqp connection established");
        Ok(Box::new(AmqpConnection { inner: connection }))
    }
}

struct AmqpConnection {
    inner: lapin::Connection,
}

#[async_trait]
impl TransportConnection for AmqpConnection {
    async fn open_channel(&self) -> Result<Box<dyn TransportChannel>, TransportError> {
        let channel = self.inner.create_channel().await.map_err(classify)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(classify)?;
        Ok(Box::new(AmqpChannel {
            inner: channel,
            declared: Mutex::new(HashSet::new()),
        }))
    }

    async fn close(&self) {
        if let Err(err) = self.inner.close(200, "client shutdown").await {
            debug!(error = %err, "amqp connection close reported an error");
        }
    }
}

struct AmqpChannel {
    inner: lapin::Channel,
    declared: Mutex<HashSet<String>>,
}

/// Queues are declared as quorum queues: the broker then stamps redelivered
/// messages with an `x-delivery-count` header, which the redelivery limit
/// depends on. Classic queues only expose a boolean redelivered flag.
fn declare_arguments() -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-queue-type".into(),
        AMQPValue::LongString("quorum".into()),
    );
    arguments
}

impl AmqpChannel {
    async fn declare(&self, queue: &str) -> Result<(), TransportError> {
        if self.declared.lock().unwrap().contains(queue) {
            return Ok(());
        }
        self.inner
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                declare_arguments(),
            )
            .await
            .map_err(classify)?;
        self.declared.lock().unwrap().insert(queue.to_string());
        Ok(())
    }
}

#[async_trait]
impl TransportChannel for AmqpChannel {
    async fn send(&self, message: &Message, require_ack: bool) -> Result<(), TransportError> {
        self.declare(&message.queue).await?;

        let mut properties = BasicProperties::default()
            .with_message_id(message.properties.message_id.clone().into())
            .with_content_type(message.properties.content_type.clone().into())
            .with_delivery_mode(if message.properties.persistent { 2 } else { 1 });
        if let Some(correlation_id) = &message.properties.correlation_id {
            properties = properties.with_correlation_id(correlation_id.clone().into());
        }

        let confirm = self
            .inner
            .basic_publish(
                "",
                &message.queue,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(classify)?;

        if require_ack {
            match confirm.await.map_err(classify)? {
                Confirmation::Nack(_) => Err(TransportError::Unavailable(
                    "broker negatively confirmed the publish".to_string(),
                )),
                _ => Ok(()),
            }
        } else {
            Ok(())
        }
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        self.declare(queue).await?;
        self.inner
            .basic_qos(prefetch.max(1), BasicQosOptions::default())
            .await
            .map_err(classify)?;

        let mut consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(classify)?;

        let (delivery_tx, delivery_rx) = mpsc::channel(prefetch.max(1) as usize);
        let queue_name = queue.to_string();

        tokio::spawn(async move {
            while let Some(next) = consumer.next().await {
                let delivery = match next {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        warn!(queue = %queue_name, error = %err, "amqp consumer stream failed");
                        break;
                    }
                };
                let attempt = delivery_attempt(&delivery);
                let message = rebuild_message(&queue_name, &delivery);
                let sink = AmqpAck {
                    acker: delivery.acker,
                    queue: queue_name.clone(),
                };
                if delivery_tx
                    .send(Delivery::new(message, attempt, Box::new(sink)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!(queue = %queue_name, "amqp consumer stream closed");
        });

        Ok(delivery_rx)
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(classify)
    }
}

fn delivery_attempt(delivery: &lapin::message::Delivery) -> u32 {
    attempt_from(&delivery.properties, delivery.redelivered)
}

/// `x-delivery-count` is the number of prior delivery attempts; absent on
/// the first delivery. The redelivered-flag fallback only covers queues
/// that predate the quorum declare and cannot count past two.
fn attempt_from(properties: &BasicProperties, redelivered: bool) -> u32 {
    if let Some(headers) = properties.headers() {
        let count = headers
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == "x-delivery-count")
            .and_then(|(_, value)| match value {
                AMQPValue::LongLongInt(v) => Some(*v as u32),
                AMQPValue::LongInt(v) => Some(*v as u32),
                AMQPValue::ShortInt(v) => Some(*v as u32),
                _ => None,
            });
        if let Some(count) = count {
            return count.saturating_add(1);
        }
    }
    if redelivered { 2 } else { 1 }
}

fn rebuild_message(queue: &str, delivery: &lapin::message::Delivery) -> Message {
    let properties = MessageProperties {
        message_id: delivery
            .properties
            .message_id()
            .clone()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        correlation_id: delivery
            .properties
            .correlation_id()
            .clone()
            .map(|s| s.as_str().to_string()),
        persistent: (*delivery.properties.delivery_mode()).map_or(false, |mode| mode == 2),
        content_type: delivery
            .properties
            .content_type()
            .clone()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "application/json".to_string()),
        created_at: (*delivery.properties.timestamp())
            .map(|seconds| seconds as i64 * 1000)
            .unwrap_or_else(|| Utc::now().timestamp_millis()),
    };
    Message {
        queue: queue.to_string(),
        body: delivery.data.clone(),
        properties,
    }
}

struct AmqpAck {
    acker: lapin::acker::Acker,
    queue: String,
}

#[async_trait]
impl AckSink for AmqpAck {
    async fn ack(self: Box<Self>) {
        if let Err(err) = self.acker.ack(BasicAckOptions::default()).await {
            warn!(queue = %self.queue, error = %err, "ack failed");
        }
    }

    async fn nack(self: Box<Self>, requeue: bool) {
        let options = BasicNackOptions {
            requeue,
            ..Default::default()
        };
        if let Err(err) = self.acker.nack(options).await {
            warn!(queue = %self.queue, error = %err, "nack failed");
        }
    }
}
