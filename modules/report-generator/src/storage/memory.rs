//! In-memory object storage for tests and local development

use super::{GeneratedDocument, ObjectStorage, StorageError, StoredBlob};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    containers: HashMap<String, BTreeMap<String, GeneratedDocument>>,
    uploads: Vec<StoredBlob>,
    signed_requests: Vec<String>,
}

/// Object storage held in process memory
///
/// Locators have the form `memory://{container}/{name}`. Signed URLs append
/// a random signature, an RFC 3339 expiry (`se`) and the read permission
/// (`sp=r`) to the locator they sign. Every upload and signing request is
/// recorded for inspection.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<Mutex<State>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locator(container: &str, name: &str) -> String {
        format!("memory://{}/{}", container, name)
    }

    /// Blobs uploaded so far, in upload order
    pub async fn uploads(&self) -> Vec<StoredBlob> {
        self.state.lock().await.uploads.clone()
    }

    /// Locators passed to `signed_read_url`, in call order
    pub async fn signed_requests(&self) -> Vec<String> {
        self.state.lock().await.signed_requests.clone()
    }

    pub async fn contains(&self, container: &str, name: &str) -> bool {
        self.state
            .lock()
            .await
            .containers
            .get(container)
            .is_some_and(|blobs| blobs.contains_key(name))
    }
}

#[async_trait]
impl ObjectStorage for InMemoryStorage {
    async fn upload(
        &self,
        container: &str,
        name: &str,
        document: GeneratedDocument,
    ) -> Result<StoredBlob, StorageError> {
        if name.trim().is_empty() {
            return Err(StorageError::Upload {
                container: container.to_string(),
                name: name.to_string(),
                message: "blob name must not be empty".to_string(),
            });
        }

        let mut state = self.state.lock().await;

        if !state.containers.contains_key(container) {
            tracing::info!(container, "Creating in-memory container");
        }

        let size = document.len();
        state
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), document);

        let blob = StoredBlob {
            container: container.to_string(),
            name: name.to_string(),
            uri: Self::locator(container, name),
        };
        state.uploads.push(blob.clone());

        tracing::debug!(container, name, size, "Stored blob in memory");
        Ok(blob)
    }

    async fn download(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        self.state
            .lock()
            .await
            .containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .map(|document| document.bytes().to_vec())
            .ok_or_else(|| StorageError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    async fn list(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let state = self.state.lock().await;
        let names = state
            .containers
            .get(container)
            .map(|blobs| {
                blobs
                    .keys()
                    .filter(|name| prefix.map_or(true, |p| name.starts_with(p)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    async fn signed_read_url(&self, blob_uri: &str, ttl: Duration) -> Result<String, StorageError> {
        if blob_uri.trim().is_empty() {
            return Err(StorageError::InvalidUri(blob_uri.to_string()));
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StorageError::Signing {
            uri: blob_uri.to_string(),
            message: e.to_string(),
        })?;
        let expires_at = (Utc::now() + ttl).to_rfc3339_opts(SecondsFormat::Secs, true);

        self.state
            .lock()
            .await
            .signed_requests
            .push(blob_uri.to_string());

        let base = blob_uri.split('?').next().unwrap_or(blob_uri);
        Ok(format!(
            "{}?sig={}&se={}&sp=r",
            base,
            Uuid::new_v4().simple(),
            expires_at
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_creates_container_and_returns_locator() {
        let storage = InMemoryStorage::new();

        let blob = storage
            .upload("generated-reports", "report-1.docx", GeneratedDocument::word(vec![1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(blob.uri, "memory://generated-reports/report-1.docx");
        assert!(storage.contains("generated-reports", "report-1.docx").await);
        assert_eq!(
            storage.download("generated-reports", "report-1.docx").await.unwrap(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_download_missing_blob() {
        let storage = InMemoryStorage::new();
        let result = storage.download("generated-reports", "nope.docx").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let storage = InMemoryStorage::new();
        for name in ["report-1-a.docx", "report-1-b.docx", "report-2-a.docx"] {
            storage
                .upload("reports", name, GeneratedDocument::word(vec![0]))
                .await
                .unwrap();
        }

        let names = storage.list("reports", Some("report-1-")).await.unwrap();
        assert_eq!(names, vec!["report-1-a.docx", "report-1-b.docx"]);
        assert_eq!(storage.list("reports", None).await.unwrap().len(), 3);
        assert!(storage.list("missing", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signed_url_is_read_only_and_expires() {
        let storage = InMemoryStorage::new();

        let url = storage
            .signed_read_url("https://store/img1", Duration::from_secs(2 * 60 * 60))
            .await
            .unwrap();

        assert!(url.starts_with("https://store/img1?sig="));
        assert!(url.contains("&sp=r"));

        let expiry = url
            .split("&se=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap();
        let expiry = chrono::DateTime::parse_from_rfc3339(expiry).unwrap();
        let remaining = expiry.with_timezone(&Utc) - Utc::now();
        assert!(remaining > chrono::Duration::minutes(119));
        assert!(remaining <= chrono::Duration::hours(2));

        assert_eq!(storage.signed_requests().await, vec!["https://store/img1"]);
    }

    #[tokio::test]
    async fn test_signed_url_rejects_empty_locator() {
        let storage = InMemoryStorage::new();
        let result = storage.signed_read_url("", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(StorageError::InvalidUri(_))));
    }
}
