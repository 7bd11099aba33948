use super::{DocumentGenerator, GenerationError, ReportRow};
use crate::storage::{GeneratedDocument, WORD_CONTENT_TYPE};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct RenderRequest<'a> {
    template: &'a str,
    rows: &'a [ReportRow],
}

/// Client for the document rendering service
///
/// POSTs `{ "template": ..., "rows": [...] }` as JSON and treats the
/// response body as the rendered document.
#[derive(Clone)]
pub struct HttpDocumentGenerator {
    http_client: Client,
    render_url: String,
    template: String,
}

impl HttpDocumentGenerator {
    pub fn new(render_url: impl Into<String>, template: impl Into<String>) -> Result<Self, GenerationError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        Ok(Self {
            http_client,
            render_url: render_url.into(),
            template: template.into(),
        })
    }
}

#[async_trait]
impl DocumentGenerator for HttpDocumentGenerator {
    async fn generate(&self, rows: &[ReportRow]) -> Result<GeneratedDocument, GenerationError> {
        tracing::debug!(url = %self.render_url, rows = rows.len(), "Requesting document render");

        let response = self
            .http_client
            .post(&self.render_url)
            .json(&RenderRequest {
                template: &self.template,
                rows,
            })
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(WORD_CONTENT_TYPE)
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if bytes.is_empty() {
            return Err(GenerationError::EmptyDocument);
        }

        Ok(GeneratedDocument::new(bytes.to_vec(), content_type))
    }
}
