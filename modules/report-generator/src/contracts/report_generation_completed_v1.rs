//! Report Generation Completed V1 Contract Types
//!
//! These types match the wire example in:
//! contracts/events/examples/reporting-generation-completed.v1.example.json

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload of `reporting.generation.completed.v1`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportGenerationCompletedV1 {
    pub project_id: i32,

    /// Durable locator of the stored document
    pub generated_report_uri: String,

    pub file_name: String,

    /// Serialized as RFC 3339 with offset
    pub generation_date_time_utc: DateTime<Utc>,

    pub author: String,

    /// Id of the request envelope that produced this report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}
