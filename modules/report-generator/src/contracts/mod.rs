//! Contract types for report generation events
//!
//! Inbound envelopes are decoded once with an opaque payload and then
//! resolved into a [`ReportEvent`] by their `type` discriminator.

pub mod report_generation_completed_v1;
pub mod report_generation_requested_v1;

pub use report_generation_completed_v1::*;
pub use report_generation_requested_v1::*;

use event_bus::{CastError, CloudEvent};
use serde_json::Value;

pub const REPORT_GENERATION_REQUESTED_V1: &str = "reporting.generation.requested.v1";
pub const REPORT_GENERATION_COMPLETED_V1: &str = "reporting.generation.completed.v1";

/// `subject` attribute written on every completed envelope
pub const REPORT_GENERATION_COMPLETED_SUBJECT: &str = "Report Generation Completed V1";

/// Inbound event, selected by the envelope `type`
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    GenerationRequested(CloudEvent<ReportGenerationRequestedV1>),
    /// A type this service has no handler for; the envelope is kept as received
    Unrecognized(CloudEvent<Value>),
}

impl ReportEvent {
    /// Resolve the payload variant for a decoded envelope
    pub fn from_envelope(envelope: CloudEvent<Value>) -> Result<Self, CastError> {
        match envelope.event_type() {
            REPORT_GENERATION_REQUESTED_V1 => Ok(ReportEvent::GenerationRequested(envelope.cast()?)),
            _ => Ok(ReportEvent::Unrecognized(envelope)),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            ReportEvent::GenerationRequested(e) => e.event_type(),
            ReportEvent::Unrecognized(e) => e.event_type(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ReportEvent::GenerationRequested(e) => e.id(),
            ReportEvent::Unrecognized(e) => e.id(),
        }
    }
}
