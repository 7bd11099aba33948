//! Common test utilities for report pipeline tests
//!
//! Everything runs in process: `InMemoryBus` for the queue and topic,
//! `InMemoryStorage` for blobs, and recording doubles for the renderer.

#![allow(dead_code)]

use async_trait::async_trait;
use event_bus::{
    BusError, BusResult, CloudEvent, DeadLetterReason, Delivery, EventBus, InMemoryBus,
    MessageSender, Settlement,
};
use futures::stream::{self, BoxStream, StreamExt};
use report_generator::consumer::{ConsumerSettings, ReportRequestedConsumer, UnknownEventPolicy};
use report_generator::generation::{DocumentGenerator, GenerationError, ReportRow};
use report_generator::services::{ReportGenerationService, ReportSettings};
use report_generator::storage::{
    GeneratedDocument, InMemoryStorage, ObjectStorage, StorageError, StoredBlob,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const REQUESTS_QUEUE: &str = "reporting.generation.requested";
pub const COMPLETED_TOPIC: &str = "reporting.generation.completed";
pub const REPORTS_CONTAINER: &str = "generated-reports";

/// Renderer double that records every call and returns a fixed document
#[derive(Default)]
pub struct RecordingGenerator {
    calls: Mutex<Vec<Vec<ReportRow>>>,
}

impl RecordingGenerator {
    pub async fn calls(&self) -> Vec<Vec<ReportRow>> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl DocumentGenerator for RecordingGenerator {
    async fn generate(&self, rows: &[ReportRow]) -> Result<GeneratedDocument, GenerationError> {
        self.calls.lock().await.push(rows.to_vec());
        Ok(GeneratedDocument::word(b"PK\x03\x04rendered".to_vec()))
    }
}

/// Renderer double that always fails
#[derive(Default)]
pub struct FailingGenerator {
    calls: AtomicUsize,
}

impl FailingGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentGenerator for FailingGenerator {
    async fn generate(&self, _rows: &[ReportRow]) -> Result<GeneratedDocument, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GenerationError::Status {
            status: 500,
            body: "renderer crashed".to_string(),
        })
    }
}

/// Bus whose senders always fail to send; everything else goes to `inner`
pub struct FailingPublishBus {
    pub inner: InMemoryBus,
    pub senders_closed: Arc<AtomicUsize>,
}

impl FailingPublishBus {
    pub fn new(inner: InMemoryBus) -> Self {
        Self {
            inner,
            senders_closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct FailingSender {
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageSender for FailingSender {
    async fn send(&self, _payload: Vec<u8>) -> BusResult<()> {
        Err(BusError::PublishError("topic unavailable".to_string()))
    }

    async fn close(&self) -> BusResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl EventBus for FailingPublishBus {
    async fn publish(&self, _subject: &str, _payload: Vec<u8>) -> BusResult<()> {
        Err(BusError::PublishError("topic unavailable".to_string()))
    }

    async fn open_sender(&self, _destination: &str) -> BusResult<Box<dyn MessageSender>> {
        Ok(Box::new(FailingSender {
            closed: self.senders_closed.clone(),
        }))
    }

    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        self.inner.subscribe(queue).await
    }

    fn endpoint(&self) -> String {
        "failing://publish".to_string()
    }
}

/// Bus whose subscription yields one transport error before the real deliveries
pub struct FlakyStreamBus {
    pub inner: InMemoryBus,
}

#[async_trait]
impl EventBus for FlakyStreamBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.inner.publish(subject, payload).await
    }

    async fn open_sender(&self, destination: &str) -> BusResult<Box<dyn MessageSender>> {
        self.inner.open_sender(destination).await
    }

    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        let deliveries = self.inner.subscribe(queue).await?;
        let fault = stream::once(async {
            Err(BusError::ReceiveError("connection reset by peer".to_string()))
        });
        Ok(fault.chain(deliveries).boxed())
    }

    fn endpoint(&self) -> String {
        "flaky://in-process".to_string()
    }

    async fn close(&self) -> BusResult<()> {
        self.inner.close().await
    }
}

/// Bus that cannot establish a subscription
pub struct FailingSubscribeBus {
    pub inner: InMemoryBus,
}

#[async_trait]
impl EventBus for FailingSubscribeBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.inner.publish(subject, payload).await
    }

    async fn open_sender(&self, destination: &str) -> BusResult<Box<dyn MessageSender>> {
        self.inner.open_sender(destination).await
    }

    async fn subscribe(&self, queue: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        Err(BusError::SubscribeError(format!("stream for '{}' not found", queue)))
    }

    fn endpoint(&self) -> String {
        "failing://subscribe".to_string()
    }
}

/// Bus whose delivery stream ends immediately, as after a server-side consumer delete
pub struct EndedStreamBus {
    pub inner: InMemoryBus,
}

#[async_trait]
impl EventBus for EndedStreamBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.inner.publish(subject, payload).await
    }

    async fn open_sender(&self, destination: &str) -> BusResult<Box<dyn MessageSender>> {
        self.inner.open_sender(destination).await
    }

    async fn subscribe(&self, _queue: &str) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        Ok(stream::empty().boxed())
    }

    fn endpoint(&self) -> String {
        "ended://in-process".to_string()
    }

    async fn close(&self) -> BusResult<()> {
        self.inner.close().await
    }
}

struct RejectingSettlement;

#[async_trait]
impl Settlement for RejectingSettlement {
    async fn complete(&self) -> BusResult<()> {
        Err(BusError::SettlementError("lock lost".to_string()))
    }

    async fn dead_letter(&self, _reason: &DeadLetterReason) -> BusResult<()> {
        Err(BusError::SettlementError("lock lost".to_string()))
    }

    async fn abandon(&self) -> BusResult<()> {
        Err(BusError::SettlementError("lock lost".to_string()))
    }
}

/// Wrap a delivery so every settlement call is rejected by the transport
pub fn with_rejecting_settlement(delivery: Delivery) -> Delivery {
    Delivery::new(delivery.message, Box::new(RejectingSettlement))
}

/// Storage whose uploads always fail; signing and reads go to `inner`
pub struct FailingUploadStorage {
    pub inner: InMemoryStorage,
}

#[async_trait]
impl ObjectStorage for FailingUploadStorage {
    async fn upload(
        &self,
        container: &str,
        name: &str,
        _document: GeneratedDocument,
    ) -> Result<StoredBlob, StorageError> {
        Err(StorageError::Upload {
            container: container.to_string(),
            name: name.to_string(),
            message: "quota exceeded".to_string(),
        })
    }

    async fn download(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.download(container, name).await
    }

    async fn list(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        self.inner.list(container, prefix).await
    }

    async fn signed_read_url(&self, blob_uri: &str, ttl: Duration) -> Result<String, StorageError> {
        self.inner.signed_read_url(blob_uri, ttl).await
    }
}

/// Storage that cannot issue signed URLs; everything else goes to `inner`
pub struct FailingSigningStorage {
    pub inner: InMemoryStorage,
}

#[async_trait]
impl ObjectStorage for FailingSigningStorage {
    async fn upload(
        &self,
        container: &str,
        name: &str,
        document: GeneratedDocument,
    ) -> Result<StoredBlob, StorageError> {
        self.inner.upload(container, name, document).await
    }

    async fn download(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.download(container, name).await
    }

    async fn list(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        self.inner.list(container, prefix).await
    }

    async fn signed_read_url(&self, blob_uri: &str, _ttl: Duration) -> Result<String, StorageError> {
        Err(StorageError::Signing {
            uri: blob_uri.to_string(),
            message: "account key unavailable".to_string(),
        })
    }
}

pub fn settings() -> ReportSettings {
    ReportSettings {
        completed_topic: COMPLETED_TOPIC.to_string(),
        reports_container: REPORTS_CONTAINER.to_string(),
        event_source: "urn:jpdunn:report-generator".to_string(),
    }
}

pub fn consumer_settings(policy: UnknownEventPolicy, max_in_flight: usize) -> ConsumerSettings {
    ConsumerSettings {
        queue: REQUESTS_QUEUE.to_string(),
        max_in_flight,
        unknown_event_policy: policy,
    }
}

/// Consumer and service wired to the given doubles.
///
/// `service_bus` is where completed events go; the consumer reads from `consumer_bus`.
pub fn consumer(
    consumer_bus: Arc<dyn EventBus>,
    service_bus: Arc<dyn EventBus>,
    storage: &InMemoryStorage,
    generator: Arc<dyn DocumentGenerator>,
    policy: UnknownEventPolicy,
) -> ReportRequestedConsumer {
    consumer_with_storage(
        consumer_bus,
        service_bus,
        Arc::new(storage.clone()),
        generator,
        policy,
    )
}

/// Like [`consumer`], with any storage implementation
pub fn consumer_with_storage(
    consumer_bus: Arc<dyn EventBus>,
    service_bus: Arc<dyn EventBus>,
    storage: Arc<dyn ObjectStorage>,
    generator: Arc<dyn DocumentGenerator>,
    policy: UnknownEventPolicy,
) -> ReportRequestedConsumer {
    let service = Arc::new(ReportGenerationService::new(
        service_bus,
        storage,
        generator,
        settings(),
    ));
    ReportRequestedConsumer::new(consumer_bus, service, consumer_settings(policy, 1))
}

/// The request payload used by the end-to-end scenarios
pub fn scenario_a_payload() -> Value {
    json!({
        "projectId": 42,
        "author": "jdunn",
        "markupDetails": [{
            "imageUri": "https://store/img1",
            "tags": ["a", "b"],
            "comments": "c1",
            "locationName": "L1",
            "author": "x"
        }]
    })
}

/// Wire bytes of a CloudEvent with the given type, id and payload
pub fn envelope_bytes(event_type: &str, id: &str, data: Value) -> Vec<u8> {
    CloudEvent::new(event_type, "urn:test:producer", id, data)
        .unwrap()
        .with_data_content_type("application/json")
        .to_vec()
        .unwrap()
}

/// Publish `payload` to the request queue and pull it back as a delivery
pub async fn deliver(bus: &InMemoryBus, payload: Vec<u8>) -> Delivery {
    bus.publish(REQUESTS_QUEUE, payload).await.unwrap();
    let mut deliveries = bus.subscribe(REQUESTS_QUEUE).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), deliveries.next())
        .await
        .expect("timeout waiting for delivery")
        .expect("stream ended")
        .expect("transport error")
}

/// Poll until `check` returns true or a second has passed
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}
