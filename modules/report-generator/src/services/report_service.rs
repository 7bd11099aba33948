//! Report generation orchestration
//!
//! One request produces one document and one completion event. The stages
//! run strictly in order and any failure stops the sequence:
//!
//! 1. Sign a read URL for every markup photo
//! 2. Render the document
//! 3. Upload it under a unique name
//! 4. Publish `reporting.generation.completed.v1`
//!
//! A failed publish leaves the uploaded document in place.

use chrono::Utc;
use event_bus::{BusError, CloudEvent, EnvelopeError, EventBus, JSON_CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::contracts::{
    ReportGenerationCompletedV1, ReportGenerationRequestedV1, REPORT_GENERATION_COMPLETED_SUBJECT,
    REPORT_GENERATION_COMPLETED_V1,
};
use crate::generation::{DocumentGenerator, GenerationError, ReportRow};
use crate::storage::{ObjectStorage, StorageError};

/// Lifetime of the signed photo URLs handed to the renderer
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// `source` attribute of completed events unless configured otherwise
pub const DEFAULT_EVENT_SOURCE: &str = "urn:jpdunn:report-generator";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to sign image URL for markup entry {index}: {source}")]
    SignedUrl {
        index: usize,
        #[source]
        source: StorageError,
    },

    #[error("document generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("report upload failed: {0}")]
    Upload(#[from] StorageError),

    #[error("failed to build completed event: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("failed to serialize completed event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to publish completed event: {0}")]
    Publish(#[from] BusError),
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Topic that receives completed events
    pub completed_topic: String,
    /// Container that receives generated documents
    pub reports_container: String,
    pub event_source: String,
}

/// Name of a generated document: `report-{project_id}-{uuid}.docx`
pub fn report_file_name(project_id: i32) -> String {
    format!("report-{}-{}.docx", project_id, Uuid::new_v4())
}

/// Orchestrates generation, storage and publication for one request at a time.
///
/// Holds only shared, long-lived handles; nothing is mutated between requests.
pub struct ReportGenerationService {
    bus: Arc<dyn EventBus>,
    storage: Arc<dyn ObjectStorage>,
    generator: Arc<dyn DocumentGenerator>,
    settings: ReportSettings,
}

impl ReportGenerationService {
    pub fn new(
        bus: Arc<dyn EventBus>,
        storage: Arc<dyn ObjectStorage>,
        generator: Arc<dyn DocumentGenerator>,
        settings: ReportSettings,
    ) -> Self {
        Self {
            bus,
            storage,
            generator,
            settings,
        }
    }

    pub fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    /// Generate, store and announce the report for one request.
    ///
    /// `correlation_id` is the id of the request envelope; it is copied into
    /// the completed payload. Returns the published payload.
    pub async fn handle_request(
        &self,
        request: &ReportGenerationRequestedV1,
        correlation_id: Option<&str>,
    ) -> Result<ReportGenerationCompletedV1, ReportError> {
        tracing::info!(
            project_id = request.project_id,
            author = %request.author,
            markup_count = request.markup_details.len(),
            "Generating report"
        );

        let rows = self.build_rows(request).await?;
        let document = self.generator.generate(&rows).await?;

        let file_name = report_file_name(request.project_id);
        let blob = self
            .storage
            .upload(&self.settings.reports_container, &file_name, document)
            .await?;

        tracing::info!(
            project_id = request.project_id,
            file_name = %file_name,
            uri = %blob.uri,
            "Report uploaded"
        );

        let generated_at = Utc::now();
        let completed = ReportGenerationCompletedV1 {
            project_id: request.project_id,
            generated_report_uri: blob.uri,
            file_name,
            generation_date_time_utc: generated_at,
            author: request.author.clone(),
            correlation_id: correlation_id.map(str::to_string),
        };

        let envelope = CloudEvent::generate(
            REPORT_GENERATION_COMPLETED_V1,
            self.settings.event_source.as_str(),
            completed,
        )?
        .with_subject(REPORT_GENERATION_COMPLETED_SUBJECT)
        .with_time(generated_at)
        .with_data_content_type(JSON_CONTENT_TYPE);

        self.publish(&envelope).await?;

        tracing::info!(
            project_id = request.project_id,
            event_id = %envelope.id(),
            topic = %self.settings.completed_topic,
            "Report generation completed event published"
        );

        Ok(envelope.into_data())
    }

    /// Translate markup entries into template rows, signing photo URLs
    async fn build_rows(
        &self,
        request: &ReportGenerationRequestedV1,
    ) -> Result<Vec<ReportRow>, ReportError> {
        let mut rows = Vec::with_capacity(request.markup_details.len());

        for (index, detail) in request.markup_details.iter().enumerate() {
            let image_uri = match detail.image() {
                Some(uri) => Some(
                    self.storage
                        .signed_read_url(uri, SIGNED_URL_TTL)
                        .await
                        .map_err(|source| ReportError::SignedUrl { index, source })?,
                ),
                None => None,
            };

            rows.push(ReportRow {
                image_uri,
                comments: detail.comments.clone(),
                location: detail.location_name.clone(),
                tags: detail.tags.join(", "),
            });
        }

        Ok(rows)
    }

    /// Send through a sender scoped to this call; the sender is closed on every path
    async fn publish(
        &self,
        envelope: &CloudEvent<ReportGenerationCompletedV1>,
    ) -> Result<(), ReportError> {
        let payload = envelope.to_vec()?;
        let sender = self.bus.open_sender(&self.settings.completed_topic).await?;

        let sent = sender.send(payload).await;

        if let Err(e) = sender.close().await {
            tracing::warn!(
                topic = %self.settings.completed_topic,
                error = %e,
                "Failed to close completed event sender"
            );
        }

        sent?;
        Ok(())
    }
}
