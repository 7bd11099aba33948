//! Report Generation Requested V1 Contract Types
//!
//! These types match the wire example in:
//! contracts/events/examples/reporting-generation-requested.v1.example.json
//!
//! IMPORTANT: Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Payload of `reporting.generation.requested.v1`
///
/// This is the payload type used with `CloudEvent<ReportGenerationRequestedV1>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportGenerationRequestedV1 {
    pub project_id: i32,

    #[serde(default)]
    pub author: String,

    /// Markup entries in report order
    #[serde(default)]
    pub markup_details: Vec<MarkupDetail>,
}

/// One markup entry captured against a project
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkupDetail {
    /// Blob locator of the photo; absent or empty when the entry has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub comments: String,

    #[serde(default)]
    pub location_name: String,

    #[serde(default)]
    pub author: String,
}

impl MarkupDetail {
    /// Image locator, when one is present and non-empty
    pub fn image(&self) -> Option<&str> {
        self.image_uri.as_deref().filter(|uri| !uri.is_empty())
    }
}
