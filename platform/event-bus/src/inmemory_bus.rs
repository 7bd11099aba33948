//! In-memory implementation of the EventBus trait for testing and development

use crate::{
    BusError, BusMessage, BusResult, DeadLetterReason, Delivery, EventBus, MessageSender,
    Settlement,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// A message moved to the dead-letter facility, with the reason it was moved
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetteredMessage {
    pub message: BusMessage,
    pub reason: DeadLetterReason,
}

/// EventBus implementation using in-process FIFO queues
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that assert on message dispositions
///
/// Every destination is a competing-consumer queue: a message published to
/// it is handed to exactly one subscriber. Messages published before anyone
/// subscribes are retained. Every publish and every settlement is recorded
/// so tests can inspect what happened.
///
/// A delivery dropped without settling is counted as delivered and is not
/// redelivered; there is no lock expiry in memory.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// bus.publish("test.queue", b"hello".to_vec()).await?;
///
/// let mut deliveries = bus.subscribe("test.queue").await?;
/// let delivery = deliveries.next().await.unwrap()?;
/// assert_eq!(delivery.message.payload, b"hello");
///
/// delivery.settlement.complete().await?;
/// assert_eq!(bus.completed().await.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, Arc<Queue>>>,
    ledger: Mutex<Ledger>,
    senders_opened: AtomicUsize,
    senders_closed: AtomicUsize,
    closed: AtomicBool,
}

#[derive(Default)]
struct Queue {
    items: Mutex<VecDeque<BusMessage>>,
    notify: Notify,
}

#[derive(Default)]
struct Ledger {
    published: Vec<BusMessage>,
    delivered: Vec<BusMessage>,
    completed: Vec<BusMessage>,
    dead_lettered: Vec<DeadLetteredMessage>,
    abandoned: Vec<BusMessage>,
}

impl Inner {
    async fn queue(&self, destination: &str) -> Arc<Queue> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(Queue::default()))
            .clone()
    }

    async fn enqueue(&self, message: BusMessage) {
        let queue = self.queue(&message.subject).await;
        queue.items.lock().await.push_back(message);
        queue.notify.notify_one();
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionError("bus is closed".to_string()));
        }

        let message = BusMessage::new(subject.to_string(), payload);
        self.ledger.lock().await.published.push(message.clone());
        self.enqueue(message).await;

        Ok(())
    }
}

impl InMemoryBus {
    /// Create a new in-memory event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published, in publish order, across all destinations
    pub async fn published_all(&self) -> Vec<BusMessage> {
        self.inner.ledger.lock().await.published.clone()
    }

    /// Messages published to one destination, in publish order
    pub async fn published(&self, destination: &str) -> Vec<BusMessage> {
        self.inner
            .ledger
            .lock()
            .await
            .published
            .iter()
            .filter(|m| m.subject == destination)
            .cloned()
            .collect()
    }

    /// Messages handed to a subscriber, settled or not
    pub async fn delivered(&self) -> Vec<BusMessage> {
        self.inner.ledger.lock().await.delivered.clone()
    }

    pub async fn completed(&self) -> Vec<BusMessage> {
        self.inner.ledger.lock().await.completed.clone()
    }

    pub async fn dead_lettered(&self) -> Vec<DeadLetteredMessage> {
        self.inner.ledger.lock().await.dead_lettered.clone()
    }

    pub async fn abandoned(&self) -> Vec<BusMessage> {
        self.inner.ledger.lock().await.abandoned.clone()
    }

    /// Number of messages waiting in a destination queue
    pub async fn pending(&self, destination: &str) -> usize {
        let queue = self.inner.queue(destination).await;
        let len = queue.items.lock().await.len();
        len
    }

    pub fn senders_opened(&self) -> usize {
        self.inner.senders_opened.load(Ordering::SeqCst)
    }

    pub fn senders_closed(&self) -> usize {
        self.inner.senders_closed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

struct InMemorySettlement {
    inner: Arc<Inner>,
    message: BusMessage,
    settled: AtomicBool,
}

impl InMemorySettlement {
    fn claim(&self) -> BusResult<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadySettled);
        }
        Ok(())
    }
}

#[async_trait]
impl Settlement for InMemorySettlement {
    async fn complete(&self) -> BusResult<()> {
        self.claim()?;
        self.inner
            .ledger
            .lock()
            .await
            .completed
            .push(self.message.clone());
        Ok(())
    }

    async fn dead_letter(&self, reason: &DeadLetterReason) -> BusResult<()> {
        self.claim()?;
        let message = self
            .message
            .clone()
            .with_headers(reason.headers(&self.message.subject));
        self.inner
            .ledger
            .lock()
            .await
            .dead_lettered
            .push(DeadLetteredMessage {
                message,
                reason: reason.clone(),
            });
        Ok(())
    }

    async fn abandon(&self) -> BusResult<()> {
        self.claim()?;
        self.inner
            .ledger
            .lock()
            .await
            .abandoned
            .push(self.message.clone());
        self.inner.enqueue(self.message.clone()).await;
        Ok(())
    }
}

struct InMemorySender {
    inner: Arc<Inner>,
    destination: String,
    closed: AtomicBool,
}

#[async_trait]
impl MessageSender for InMemorySender {
    async fn send(&self, payload: Vec<u8>) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::SenderClosed(self.destination.clone()));
        }
        self.inner.publish(&self.destination, payload).await
    }

    async fn close(&self) -> BusResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.inner.senders_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.inner.publish(subject, payload).await
    }

    async fn open_sender(&self, destination: &str) -> BusResult<Box<dyn MessageSender>> {
        if self.is_closed() {
            return Err(BusError::ConnectionError("bus is closed".to_string()));
        }

        self.inner.senders_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySender {
            inner: self.inner.clone(),
            destination: destination.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        if self.is_closed() {
            return Err(BusError::SubscribeError("bus is closed".to_string()));
        }

        let inner = self.inner.clone();
        let queue = inner.queue(queue).await;

        let stream = async_stream::stream! {
            loop {
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }

                let next = queue.items.lock().await.pop_front();
                match next {
                    Some(message) => {
                        inner.ledger.lock().await.delivered.push(message.clone());
                        let settlement = InMemorySettlement {
                            inner: inner.clone(),
                            message: message.clone(),
                            settled: AtomicBool::new(false),
                        };
                        yield Ok(Delivery::new(message, Box::new(settlement)));
                    }
                    None => queue.notify.notified().await,
                }
            }
        };

        Ok(stream.boxed())
    }

    fn endpoint(&self) -> String {
        "memory://in-process".to_string()
    }

    async fn close(&self) -> BusResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        for queue in self.inner.queues.lock().await.values() {
            queue.notify.notify_waiters();
            queue.notify.notify_one();
        }
        Ok(())
    }
}
