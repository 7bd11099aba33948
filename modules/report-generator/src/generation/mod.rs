//! Document generation port
//!
//! The rendering engine is an external service: it receives the ordered
//! report rows and returns the rendered Word document.

pub mod http;

pub use http::HttpDocumentGenerator;

use crate::storage::GeneratedDocument;
use async_trait::async_trait;
use serde::Serialize;

/// One row of the report template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    /// Signed read URL of the photo, when the markup has one
    pub image_uri: Option<String>,
    pub comments: String,
    pub location: String,
    /// Tags joined for display, e.g. `"a, b"`
    pub tags: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("renderer request failed: {0}")]
    Request(String),

    #[error("renderer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("renderer returned an empty document")]
    EmptyDocument,
}

#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate(&self, rows: &[ReportRow]) -> Result<GeneratedDocument, GenerationError>;
}
