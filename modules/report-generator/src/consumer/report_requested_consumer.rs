//! Report Generation Requested Consumer
//!
//! Pulls messages from the report request queue, resolves them into
//! [`ReportEvent`]s and settles every message according to the outcome:
//!
//! - handled successfully → completed
//! - decode, cast or generation failure → dead-lettered, never retried
//! - unrecognized type → [`UnknownEventPolicy`]
//! - shutdown requested before work starts → abandoned for redelivery
//!
//! When the transport rejects the settlement itself the delivery is reported
//! as [`Disposition::SettlementFailed`]; the message is redelivered once its
//! lock expires.

use event_bus::{
    BusMessage, BusResult, CastError, CloudEvent, DeadLetterReason, Delivery, EnvelopeError,
    EventBus, FailureCategory, Settlement,
};
use futures::StreamExt;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::contracts::ReportEvent;
use crate::dlq;
use crate::services::report_service::{ReportError, ReportGenerationService};

/// What to do with a message whose type has no handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownEventPolicy {
    /// Leave it unsettled; the transport redelivers it once its lock expires
    #[default]
    Ignore,
    /// Acknowledge it as not meant for this service
    Complete,
    DeadLetter,
}

impl FromStr for UnknownEventPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "ignore" => Ok(UnknownEventPolicy::Ignore),
            "complete" => Ok(UnknownEventPolicy::Complete),
            "dead-letter" | "deadletter" | "dead_letter" => Ok(UnknownEventPolicy::DeadLetter),
            other => Err(format!(
                "unknown event policy '{}': expected ignore, complete or dead-letter",
                other
            )),
        }
    }
}

/// Final state of one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    DeadLettered,
    /// Left unsettled
    Ignored,
    /// Released for redelivery without processing
    Abandoned,
    /// The transport rejected the complete, dead-letter or abandon call
    SettlementFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] EnvelopeError),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

impl ProcessingError {
    pub fn category(&self) -> FailureCategory {
        match self {
            ProcessingError::Decode(_) | ProcessingError::Cast(_) => FailureCategory::Unrecoverable,
            ProcessingError::Report(ReportError::Envelope(_))
            | ProcessingError::Report(ReportError::Serialization(_)) => {
                FailureCategory::Unrecoverable
            }
            ProcessingError::Report(_) => FailureCategory::DependencyFailure,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub queue: String,
    /// Deliveries processed concurrently; values below 1 are treated as 1
    pub max_in_flight: usize,
    pub unknown_event_policy: UnknownEventPolicy,
}

enum Outcome {
    Handled,
    Unrecognized(CloudEvent<Value>),
}

#[derive(Clone)]
pub struct ReportRequestedConsumer {
    bus: Arc<dyn EventBus>,
    service: Arc<ReportGenerationService>,
    settings: ConsumerSettings,
}

impl ReportRequestedConsumer {
    pub fn new(
        bus: Arc<dyn EventBus>,
        service: Arc<ReportGenerationService>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            bus,
            service,
            settings,
        }
    }

    /// Consume until `shutdown` turns `true` or its sender is dropped.
    ///
    /// On shutdown no new deliveries are pulled, in-flight deliveries finish
    /// and are settled, the subscription is dropped and then the bus client is
    /// closed. Transport errors on the stream are logged and do not stop the
    /// loop.
    ///
    /// Also returns without a shutdown request when the subscription cannot
    /// be established or the delivery stream ends; the consumer is dead then.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> BusResult<()> {
        let queue = self.settings.queue.as_str();
        let limit = self.settings.max_in_flight.max(1);

        let mut deliveries = self.bus.subscribe(queue).await?;
        tracing::info!(queue, max_in_flight = limit, "Report request consumer started");

        let mut in_flight: JoinSet<Disposition> = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if in_flight.len() >= limit {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    Some(joined) = in_flight.join_next() => log_joined(joined),
                }
                continue;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        let consumer = self.clone();
                        let shutdown = shutdown.clone();
                        in_flight.spawn(async move {
                            consumer.handle_delivery(delivery, &shutdown).await
                        });
                    }
                    Some(Err(e)) => {
                        tracing::error!(
                            error_source = "receive",
                            entity_path = queue,
                            endpoint = %self.bus.endpoint(),
                            error = %e,
                            "Transport error while receiving report requests"
                        );
                    }
                    None => {
                        tracing::warn!(queue, "Report request stream ended");
                        break;
                    }
                },
            }
        }

        tracing::info!(queue, in_flight = in_flight.len(), "Stopping report request consumer");

        while let Some(joined) = in_flight.join_next().await {
            log_joined(joined);
        }

        drop(deliveries);
        self.bus.close().await?;

        tracing::info!(queue, "Report request consumer stopped");
        Ok(())
    }

    /// Process one delivery and settle it
    pub async fn handle_delivery(
        &self,
        delivery: Delivery,
        shutdown: &watch::Receiver<bool>,
    ) -> Disposition {
        let Delivery {
            message,
            settlement,
        } = delivery;

        let span = tracing::info_span!(
            "process_report_request",
            subject = %message.subject,
            event_id = tracing::field::Empty,
            event_type = tracing::field::Empty,
        );

        async {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested, abandoning message");
                return match settlement.abandon().await {
                    Ok(()) => Disposition::Abandoned,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to abandon message");
                        Disposition::SettlementFailed
                    }
                };
            }

            match self.process(&message).await {
                Ok(Outcome::Handled) => complete(settlement.as_ref()).await,
                Ok(Outcome::Unrecognized(envelope)) => {
                    self.apply_unknown_policy(settlement.as_ref(), &message, &envelope)
                        .await
                }
                Err(e) => {
                    dead_letter(settlement.as_ref(), &message, &dlq::reason_for(&e)).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, message: &BusMessage) -> Result<Outcome, ProcessingError> {
        let envelope = CloudEvent::from_slice(&message.payload)?;

        let span = tracing::Span::current();
        span.record("event_id", envelope.id());
        span.record("event_type", envelope.event_type());

        match ReportEvent::from_envelope(envelope)? {
            ReportEvent::GenerationRequested(request) => {
                self.service
                    .handle_request(request.data(), Some(request.id()))
                    .await?;
                Ok(Outcome::Handled)
            }
            ReportEvent::Unrecognized(envelope) => Ok(Outcome::Unrecognized(envelope)),
        }
    }

    async fn apply_unknown_policy(
        &self,
        settlement: &dyn Settlement,
        message: &BusMessage,
        envelope: &CloudEvent<Value>,
    ) -> Disposition {
        match self.settings.unknown_event_policy {
            UnknownEventPolicy::Ignore => {
                tracing::warn!(
                    event_type = %envelope.event_type(),
                    "Unrecognized event type, leaving message unsettled"
                );
                Disposition::Ignored
            }
            UnknownEventPolicy::Complete => {
                tracing::info!(
                    event_type = %envelope.event_type(),
                    "Unrecognized event type, completing message"
                );
                complete(settlement).await
            }
            UnknownEventPolicy::DeadLetter => {
                let reason = dlq::unrecognized_type_reason(envelope.event_type());
                dead_letter(settlement, message, &reason).await
            }
        }
    }
}

async fn complete(settlement: &dyn Settlement) -> Disposition {
    match settlement.complete().await {
        Ok(()) => Disposition::Completed,
        Err(e) => {
            tracing::error!(error = %e, "Failed to complete message");
            Disposition::SettlementFailed
        }
    }
}

async fn dead_letter(
    settlement: &dyn Settlement,
    message: &BusMessage,
    reason: &DeadLetterReason,
) -> Disposition {
    match dlq::dead_letter(settlement, message, reason).await {
        Ok(()) => Disposition::DeadLettered,
        Err(_) => Disposition::SettlementFailed,
    }
}

fn log_joined(joined: Result<Disposition, tokio::task::JoinError>) {
    match joined {
        Ok(disposition) => tracing::debug!(?disposition, "Delivery settled"),
        Err(e) => tracing::error!(error = %e, "Delivery task failed"),
    }
}
