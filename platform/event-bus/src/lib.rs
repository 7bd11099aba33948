//! # EventBus Abstraction
//!
//! Queue transport port shared by every event-driven service: a CloudEvents
//! envelope, a publish/receive/settle interface, and dead-letter routing.
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation using NATS JetStream work queues
//! - **InMemoryBus**: Test/dev implementation backed by in-process FIFO queues
//!   with a settlement ledger for assertions
//!
//! ## Message lifecycle
//!
//! A consumer receives a [`Delivery`] and must settle it exactly once:
//!
//! - [`Settlement::complete`] removes it from the queue
//! - [`Settlement::dead_letter`] moves the original, unmodified message to the
//!   dead-letter facility together with a [`DeadLetterReason`]
//! - [`Settlement::abandon`] makes it available for redelivery
//!
//! A delivery dropped without settling stays unacknowledged and is
//! redelivered by the transport once its lock expires.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! bus.publish("reporting.requests", b"{}".to_vec()).await?;
//!
//! let mut deliveries = bus.subscribe("reporting.requests").await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     println!("Received {} bytes", delivery.message.payload.len());
//!     delivery.settlement.complete().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod envelope;
mod inmemory_bus;
mod nats_bus;

pub use envelope::{CastError, CloudEvent, EnvelopeError, CLOUD_EVENTS_SPEC_VERSION, JSON_CONTENT_TYPE};
pub use inmemory_bus::{DeadLetteredMessage, InMemoryBus};
pub use nats_bus::{JetStreamSettings, NatsBus};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Header carrying the [`FailureCategory`] of a dead-lettered message
pub const DEAD_LETTER_CATEGORY_HEADER: &str = "Dead-Letter-Category";
/// Header carrying the human readable failure description
pub const DEAD_LETTER_DESCRIPTION_HEADER: &str = "Dead-Letter-Description";
/// Header carrying the subject the message was originally received on
pub const DEAD_LETTER_ORIGINAL_SUBJECT_HEADER: &str = "Dead-Letter-Original-Subject";

/// A message received from the event bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// The subject/queue this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Transport headers, when the transport carries any
    pub headers: Option<HashMap<String, String>>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Look up a single header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(String::as_str)
    }
}

/// Why a message could not be processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// The payload cannot be decoded or cast; a producer/consumer contract mismatch
    Unrecoverable,
    /// Generation, storage or publish failed
    DependencyFailure,
    /// The envelope type matches no known handler
    UnrecognizedEventType,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Unrecoverable => "unrecoverable",
            FailureCategory::DependencyFailure => "dependency-failure",
            FailureCategory::UnrecognizedEventType => "unrecognized-event-type",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reason attached to a dead-lettered message as transport metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterReason {
    pub category: FailureCategory,
    pub description: String,
}

impl DeadLetterReason {
    pub fn new(category: FailureCategory, description: impl Into<String>) -> Self {
        Self {
            category,
            description: description.into(),
        }
    }

    /// Headers describing this reason, as written next to the original body
    pub fn headers(&self, original_subject: &str) -> HashMap<String, String> {
        HashMap::from([
            (
                DEAD_LETTER_CATEGORY_HEADER.to_string(),
                self.category.as_str().to_string(),
            ),
            (
                DEAD_LETTER_DESCRIPTION_HEADER.to_string(),
                self.description.clone(),
            ),
            (
                DEAD_LETTER_ORIGINAL_SUBJECT_HEADER.to_string(),
                original_subject.to_string(),
            ),
        ])
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to queue: {0}")]
    SubscribeError(String),

    #[error("failed to receive message: {0}")]
    ReceiveError(String),

    #[error("failed to settle message: {0}")]
    SettlementError(String),

    #[error("message has already been settled")]
    AlreadySettled,

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("sender for '{0}' is closed")]
    SenderClosed(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Disposition control for a single received message
#[async_trait]
pub trait Settlement: Send + Sync {
    /// Acknowledge the message, removing it from the queue
    async fn complete(&self) -> BusResult<()>;

    /// Move the original message to the dead-letter facility
    async fn dead_letter(&self, reason: &DeadLetterReason) -> BusResult<()>;

    /// Release the message so the transport redelivers it
    async fn abandon(&self) -> BusResult<()>;
}

/// A received message together with its settlement handle
pub struct Delivery {
    pub message: BusMessage,
    pub settlement: Box<dyn Settlement>,
}

impl Delivery {
    pub fn new(message: BusMessage, settlement: Box<dyn Settlement>) -> Self {
        Self {
            message,
            settlement,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Short-lived sender bound to one destination.
///
/// Callers must call [`MessageSender::close`] on every exit path.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send one message to the bound destination
    async fn send(&self, payload: Vec<u8>) -> BusResult<()>;

    /// Flush and release the sender
    async fn close(&self) -> BusResult<()>;
}

/// Core queue transport abstraction
///
/// This trait defines the interface that all event bus implementations must satisfy.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject
    ///
    /// # Arguments
    /// * `subject` - The queue or topic to publish to (e.g., "reporting.generation.completed")
    /// * `payload` - The message payload as raw bytes
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Open a sender scoped to a single destination
    async fn open_sender(&self, destination: &str) -> BusResult<Box<dyn MessageSender>>;

    /// Receive messages from a queue
    ///
    /// # Returns
    /// * `Ok(BoxStream)` of deliveries; `Err` items on the stream are
    ///   transport-level faults that are not tied to a message
    /// * `Err(BusError)` if the subscription could not be established
    ///
    /// # Example
    /// ```rust,no_run
    /// # use event_bus::{EventBus, InMemoryBus};
    /// # use futures::StreamExt;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let bus = InMemoryBus::new();
    /// let mut deliveries = bus.subscribe("reporting.requests").await?;
    /// while let Some(Ok(delivery)) = deliveries.next().await {
    ///     delivery.settlement.complete().await?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>>;

    /// Endpoint description used in diagnostics
    fn endpoint(&self) -> String;

    /// Release the underlying client
    async fn close(&self) -> BusResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus({})", self.endpoint())
    }
}
