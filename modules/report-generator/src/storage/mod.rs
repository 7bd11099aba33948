//! Object storage port
//!
//! Generated documents are stored under a container/name pair and
//! identified afterwards by a durable locator URI. Photos referenced by
//! markup entries are exposed to the renderer through short-lived,
//! read-only signed URLs.

pub mod memory;
pub mod s3;

pub use memory::InMemoryStorage;
pub use s3::S3ObjectStorage;

use async_trait::async_trait;
use std::time::Duration;

/// Content type of a Word (.docx) document
pub const WORD_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// A rendered document owned by whoever processes it next.
///
/// Uploading consumes the document, so its bytes are released once the
/// upload call returns, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    bytes: Vec<u8>,
    content_type: String,
}

impl GeneratedDocument {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    /// A Word document
    pub fn word(bytes: Vec<u8>) -> Self {
        Self::new(bytes, WORD_CONTENT_TYPE)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Where a document was stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub container: String,
    pub name: String,
    /// Durable locator, e.g. `s3://generated-reports/report-42-<uuid>.docx`
    pub uri: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("container '{container}' is unavailable: {message}")]
    ContainerUnavailable { container: String, message: String },

    #[error("failed to upload '{name}' to '{container}': {message}")]
    Upload {
        container: String,
        name: String,
        message: String,
    },

    #[error("blob '{name}' not found in '{container}'")]
    NotFound { container: String, name: String },

    #[error("failed to download '{name}' from '{container}': {message}")]
    Download {
        container: String,
        name: String,
        message: String,
    },

    #[error("failed to list '{container}': {message}")]
    List { container: String, message: String },

    #[error("failed to sign read URL for '{uri}': {message}")]
    Signing { uri: String, message: String },

    #[error("invalid blob locator '{0}'")]
    InvalidUri(String),
}

/// Blob store used for generated reports and markup photos
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store a document, creating the container when it does not exist yet
    async fn upload(
        &self,
        container: &str,
        name: &str,
        document: GeneratedDocument,
    ) -> Result<StoredBlob, StorageError>;

    async fn download(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Blob names in a container, optionally restricted to a prefix
    async fn list(&self, container: &str, prefix: Option<&str>)
        -> Result<Vec<String>, StorageError>;

    /// Read-only URL scoped to the single blob, valid for `ttl` from now
    async fn signed_read_url(&self, blob_uri: &str, ttl: Duration) -> Result<String, StorageError>;
}
