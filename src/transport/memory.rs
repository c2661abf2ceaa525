//! In-memory transport backend.
//!
//! Messages loop directly back to registered consumers with no network
//! round trip. Queues are created implicitly on first use, mirroring a
//! durable declare: publishing to a queue with no consumer buffers the
//! messages until one subscribes. A queue supports one active consumer at
//! a time; a nack with requeue puts the message back with an incremented
//! attempt count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::message::{AckSink, Delivery, Message};
use super::{Endpoint, Transport, TransportChannel, TransportConnection, TransportError};

type QueueItem = (Message, u32);

struct QueueSlot {
    tx: mpsc::UnboundedSender<QueueItem>,
    /// Taken by the active consumer, put back when it stops.
    rx: Option<mpsc::UnboundedReceiver<QueueItem>>,
}

impl QueueSlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueSlot>>,
}

impl MemoryBroker {
    fn sender(&self, queue: &str) -> mpsc::UnboundedSender<QueueItem> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new)
            .tx
            .clone()
    }

    fn take_receiver(&self, queue: &str) -> Option<mpsc::UnboundedReceiver<QueueItem>> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new)
            .rx
            .take()
    }

    fn put_receiver(&self, queue: &str, rx: mpsc::UnboundedReceiver<QueueItem>) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(slot) = queues.get_mut(queue) {
            slot.rx = Some(rx);
        }
    }
}

/// The in-memory test double. Clones share the same broker state, so a
/// transport handed to several clients behaves like one shared broker.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(
        &self,
        _endpoint: &Endpoint,
    ) -> Result<Box<dyn TransportConnection>, TransportError> {
        Ok(Box::new(MemoryConnection {
            broker: self.broker.clone(),
        }))
    }
}

struct MemoryConnection {
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl TransportConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn TransportChannel>, TransportError> {
        Ok(Box::new(MemoryChannel {
            broker: self.broker.clone(),
            consumers: Mutex::new(HashMap::new()),
        }))
    }

    async fn close(&self) {}
}

struct MemoryChannel {
    broker: Arc<MemoryBroker>,
    consumers: Mutex<HashMap<String, watch::Sender<bool>>>,
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    async fn send(&self, message: &Message, _require_ack: bool) -> Result<(), TransportError> {
        // Enqueueing is the confirm for the in-memory broker.
        self.broker
            .sender(&message.queue)
            .send((message.clone(), 1))
            .map_err(|_| TransportError::Closed)
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        let mut queue_rx = self
            .broker
            .take_receiver(queue)
            .ok_or_else(|| TransportError::ConsumerConflict(queue.to_string()))?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.consumers
            .lock()
            .unwrap()
            .insert(consumer_tag.to_string(), stop_tx);

        let (delivery_tx, delivery_rx) = mpsc::channel(prefetch.max(1) as usize);
        let requeue_tx = self.broker.sender(queue);
        let broker = self.broker.clone();
        let queue_name = queue.to_string();

        tokio::spawn(async move {
            loop {
                let (message, attempt) = tokio::select! {
                    _ = stop_rx.changed() => break,
                    item = queue_rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                let sink = MemoryAck {
                    requeue_tx: requeue_tx.clone(),
                    message: message.clone(),
                    attempt,
                    settled: false,
                };
                let delivery = Delivery::new(message, attempt, Box::new(sink));
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    sent = delivery_tx.send(delivery) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            // Hand the buffer back so a later consumer picks up where we left off.
            broker.put_receiver(&queue_name, queue_rx);
            debug!(queue = %queue_name, "in-memory consumer stopped");
        });

        Ok(delivery_rx)
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        if let Some(stop_tx) = self.consumers.lock().unwrap().remove(consumer_tag) {
            let _ = stop_tx.send(true);
        }
        Ok(())
    }
}

struct MemoryAck {
    requeue_tx: mpsc::UnboundedSender<QueueItem>,
    message: Message,
    attempt: u32,
    settled: bool,
}

#[async_trait]
impl AckSink for MemoryAck {
    async fn ack(mut self: Box<Self>) {
        self.settled = true;
    }

    async fn nack(mut self: Box<Self>, requeue: bool) {
        self.settled = true;
        if requeue
            && self
                .requeue_tx
                .send((self.message.clone(), self.attempt + 1))
                .is_err()
        {
            warn!("requeue after nack failed; queue receiver is gone");
        }
    }
}

/// A delivery dropped without an ack or nack was never settled: the message
/// already left the queue buffer, so it goes back at the same attempt
/// count. A broker does the same for unacked messages when the consumer
/// goes away.
impl Drop for MemoryAck {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self
                .requeue_tx
                .send((self.message.clone(), self.attempt));
        }
    }
}
