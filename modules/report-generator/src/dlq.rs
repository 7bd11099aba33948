//! Dead-letter handling
//!
//! Messages that cannot be processed are moved to the transport's dead-letter
//! facility with a [`DeadLetterReason`]. Nothing is retried at this layer:
//! an operator inspects and replays dead-lettered messages.

use event_bus::{BusMessage, BusResult, DeadLetterReason, FailureCategory, Settlement};

use crate::consumer::ProcessingError;

/// Build the reason recorded next to a failed message
pub fn reason_for(error: &ProcessingError) -> DeadLetterReason {
    DeadLetterReason::new(error.category(), error.to_string())
}

/// Reason recorded for an envelope type this service does not handle
pub fn unrecognized_type_reason(event_type: &str) -> DeadLetterReason {
    DeadLetterReason::new(
        FailureCategory::UnrecognizedEventType,
        format!("no handler for event type '{}'", event_type),
    )
}

/// Move a message to the dead-letter facility and log the outcome.
///
/// Fails when the transport rejected the dead-letter request; the message
/// then stays on the queue until its lock expires.
pub async fn dead_letter(
    settlement: &dyn Settlement,
    msg: &BusMessage,
    reason: &DeadLetterReason,
) -> BusResult<()> {
    // Best-effort envelope id for correlation; the body may not even be JSON
    let event_id = serde_json::from_slice::<serde_json::Value>(&msg.payload)
        .ok()
        .and_then(|envelope| {
            envelope
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string());

    match settlement.dead_letter(reason).await {
        Ok(()) => {
            tracing::error!(
                event_id = %event_id,
                subject = %msg.subject,
                category = %reason.category,
                error = %reason.description,
                "Message moved to dead-letter queue"
            );
            Ok(())
        }
        Err(dlq_err) => {
            tracing::error!(
                event_id = %event_id,
                subject = %msg.subject,
                category = %reason.category,
                error = %reason.description,
                dlq_error = %dlq_err,
                "Failed to dead-letter message, it will be redelivered after its lock expires"
            );
            Err(dlq_err)
        }
    }
}
