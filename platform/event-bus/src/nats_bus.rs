//! NATS JetStream implementation of the EventBus trait

use crate::{
    BusError, BusMessage, BusResult, DeadLetterReason, Delivery, EventBus, MessageSender,
    Settlement,
};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy},
    stream, AckKind,
};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Streams and consumer settings for [`NatsBus`]
#[derive(Debug, Clone, PartialEq)]
pub struct JetStreamSettings {
    /// Stream holding request queues and completion topics
    pub stream_name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    /// Stream receiving dead-lettered messages
    pub dlq_stream: String,
    /// Dead-lettered messages are republished to `{dead_letter_prefix}.{subject}`
    pub dead_letter_prefix: String,
    /// Prefix of the durable pull consumer created per queue
    pub durable_name: String,
    /// How long a delivery stays locked before JetStream redelivers it
    pub ack_wait: Duration,
}

impl Default for JetStreamSettings {
    fn default() -> Self {
        Self {
            stream_name: "REPORTING".to_string(),
            subjects: vec!["reporting.>".to_string()],
            max_age: Duration::from_secs(60 * 60 * 24 * 14), // 14 days
            dlq_stream: "REPORTING_DLQ".to_string(),
            dead_letter_prefix: "dlq.reporting".to_string(),
            durable_name: "report-generator".to_string(),
            ack_wait: Duration::from_secs(5 * 60),
        }
    }
}

/// EventBus implementation using NATS JetStream
///
/// Queues are durable pull consumers with explicit acknowledgement.
/// Dead-lettering republishes the original payload to the dead-letter stream
/// with reason headers, then terminates the original delivery so JetStream
/// never redelivers it.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, JetStreamSettings, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = NatsBus::connect("nats://localhost:4222", JetStreamSettings::default()).await?;
/// bus.publish("reporting.generation.requested", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    settings: JetStreamSettings,
    url: String,
}

impl NatsBus {
    /// Connect to NATS and make sure both streams exist
    pub async fn connect(url: &str, settings: JetStreamSettings) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        let bus = Self::new(client, url, settings);
        bus.ensure_streams().await?;
        Ok(bus)
    }

    /// Wrap an already-connected client; streams are not checked
    pub fn new(client: Client, url: &str, settings: JetStreamSettings) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            settings,
            url: url.to_string(),
        }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn ensure_streams(&self) -> BusResult<()> {
        if self
            .jetstream
            .get_stream(&self.settings.stream_name)
            .await
            .is_err()
        {
            tracing::info!(stream = %self.settings.stream_name, "Creating JetStream stream");
            self.jetstream
                .create_stream(events_stream_config(&self.settings))
                .await
                .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        }

        if self
            .jetstream
            .get_stream(&self.settings.dlq_stream)
            .await
            .is_err()
        {
            tracing::info!(stream = %self.settings.dlq_stream, "Creating dead-letter stream");
            self.jetstream
                .create_stream(dead_letter_stream_config(&self.settings))
                .await
                .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        }

        Ok(())
    }
}

/// Stream shared by request queues and completion topics.
///
/// Limits retention: completions may have several independent subscribers,
/// which a work-queue stream would reject. Queue semantics come from the
/// durable explicit-ack consumer per queue.
fn events_stream_config(settings: &JetStreamSettings) -> stream::Config {
    stream::Config {
        name: settings.stream_name.clone(),
        subjects: settings.subjects.clone(),
        max_age: settings.max_age,
        retention: stream::RetentionPolicy::Limits,
        ..Default::default()
    }
}

fn dead_letter_stream_config(settings: &JetStreamSettings) -> stream::Config {
    stream::Config {
        name: settings.dlq_stream.clone(),
        subjects: vec![format!("{}.>", settings.dead_letter_prefix)],
        max_age: Duration::from_secs(60 * 60 * 24 * 30), // 30 days
        retention: stream::RetentionPolicy::Limits,
        ..Default::default()
    }
}

/// Durable consumer names cannot contain subject tokens or wildcards
fn consumer_name(durable_prefix: &str, queue: &str) -> String {
    let suffix: String = queue
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' => '-',
            other => other,
        })
        .collect();
    format!("{}-{}", durable_prefix, suffix)
}

fn to_bus_message(message: &async_nats::Message) -> BusMessage {
    let mut msg = BusMessage::new(message.subject.to_string(), message.payload.to_vec());

    if let Some(nats_headers) = &message.headers {
        let mut headers = HashMap::new();
        for (key, values) in nats_headers.iter() {
            // Take the first value for each header
            if let Some(value) = values.first() {
                headers.insert(key.to_string(), value.to_string());
            }
        }
        if !headers.is_empty() {
            msg = msg.with_headers(headers);
        }
    }

    msg
}

struct NatsSettlement {
    message: jetstream::Message,
    jetstream: jetstream::Context,
    dead_letter_prefix: String,
    settled: AtomicBool,
}

impl NatsSettlement {
    fn claim(&self) -> BusResult<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadySettled);
        }
        Ok(())
    }
}

#[async_trait]
impl Settlement for NatsSettlement {
    async fn complete(&self) -> BusResult<()> {
        self.claim()?;
        self.message
            .ack()
            .await
            .map_err(|e| BusError::SettlementError(e.to_string()))
    }

    async fn dead_letter(&self, reason: &DeadLetterReason) -> BusResult<()> {
        self.claim()?;

        let original_subject = self.message.subject.to_string();
        let mut headers = HeaderMap::new();
        for (name, value) in reason.headers(&original_subject) {
            // header values cannot carry line breaks
            let value = value.replace(['\r', '\n'], " ");
            headers.insert(name.as_str(), value.as_str());
        }

        let dlq_subject = format!("{}.{}", self.dead_letter_prefix, original_subject);
        self.jetstream
            .publish_with_headers(dlq_subject, headers, self.message.payload.clone())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| BusError::SettlementError(e.to_string()))
    }

    async fn abandon(&self) -> BusResult<()> {
        self.claim()?;
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::SettlementError(e.to_string()))
    }
}

struct NatsSender {
    client: Client,
    jetstream: jetstream::Context,
    destination: String,
    closed: AtomicBool,
}

#[async_trait]
impl MessageSender for NatsSender {
    async fn send(&self, payload: Vec<u8>) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::SenderClosed(self.destination.clone()));
        }

        self.jetstream
            .publish(self.destination.clone(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> BusResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn open_sender(&self, destination: &str) -> BusResult<Box<dyn MessageSender>> {
        Ok(Box::new(NatsSender {
            client: self.client.clone(),
            jetstream: self.jetstream.clone(),
            destination: destination.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        let stream = self
            .jetstream
            .get_stream(&self.settings.stream_name)
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let name = consumer_name(&self.settings.durable_name, queue);
        let consumer = stream
            .get_or_create_consumer(
                &name,
                pull::Config {
                    durable_name: Some(name.clone()),
                    filter_subject: queue.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.settings.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        tracing::info!(queue, consumer = %name, "Subscribed to JetStream queue");

        let jetstream = self.jetstream.clone();
        let dead_letter_prefix = self.settings.dead_letter_prefix.clone();

        let deliveries = messages.map(move |result| {
            let message = result.map_err(|e| BusError::ReceiveError(e.to_string()))?;
            let bus_message = to_bus_message(&message.message);
            let settlement = NatsSettlement {
                message,
                jetstream: jetstream.clone(),
                dead_letter_prefix: dead_letter_prefix.clone(),
                settled: AtomicBool::new(false),
            };
            Ok(Delivery::new(bus_message, Box::new(settlement)))
        });

        Ok(deliveries.boxed())
    }

    fn endpoint(&self) -> String {
        format!("{} (stream {})", self.url, self.settings.stream_name)
    }

    /// Flush pending publishes, then drain the connection.
    ///
    /// Draining ends every subscription and closes the client. All clones of
    /// this bus share the client, so none of them can be used afterwards.
    async fn close(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        self.client
            .drain()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))
    }
}
