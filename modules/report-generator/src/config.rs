use std::env;
use std::time::Duration;

use crate::consumer::UnknownEventPolicy;
use crate::services::report_service::DEFAULT_EVENT_SOURCE;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration parsed from environment variables
///
/// Built once at startup and passed down by value.
#[derive(Debug, Clone)]
pub struct Config {
    pub bus_type: String,
    pub nats_url: String,
    pub jetstream_stream: String,
    pub jetstream_dlq_stream: String,
    pub dead_letter_prefix: String,
    pub consumer_durable_name: String,
    pub consumer_ack_wait: Duration,
    pub requests_queue: String,
    pub completed_topic: String,
    pub storage_type: String,
    pub s3_endpoint: Option<String>,
    pub reports_container: String,
    pub renderer_url: String,
    pub report_template: String,
    pub event_source: String,
    pub unknown_event_policy: UnknownEventPolicy,
    pub max_in_flight: usize,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let bus_type = get_or("BUS_TYPE", "inmemory").to_lowercase();
        if bus_type != "inmemory" && bus_type != "nats" {
            return Err(format!(
                "Invalid BUS_TYPE: {}. Must be 'inmemory' or 'nats'",
                bus_type
            ));
        }

        let storage_type = get_or("STORAGE_TYPE", "inmemory").to_lowercase();
        if storage_type != "inmemory" && storage_type != "s3" {
            return Err(format!(
                "Invalid STORAGE_TYPE: {}. Must be 'inmemory' or 's3'",
                storage_type
            ));
        }

        let renderer_url =
            get("RENDERER_URL").ok_or_else(|| "RENDERER_URL must be set".to_string())?;

        let unknown_event_policy = match get("UNKNOWN_EVENT_POLICY") {
            Some(value) => value.parse()?,
            None => UnknownEventPolicy::default(),
        };

        let max_in_flight: usize = get_or("MAX_IN_FLIGHT", "1")
            .parse()
            .map_err(|_| "MAX_IN_FLIGHT must be a positive integer".to_string())?;
        if max_in_flight == 0 {
            return Err("MAX_IN_FLIGHT must be a positive integer".to_string());
        }

        let ack_wait_secs: u64 = get_or("CONSUMER_ACK_WAIT_SECS", "300")
            .parse()
            .map_err(|_| "CONSUMER_ACK_WAIT_SECS must be a number of seconds".to_string())?;

        let log_format = match get_or("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            other => return Err(format!("Invalid LOG_FORMAT: {}. Must be 'json' or 'pretty'", other)),
        };

        Ok(Config {
            bus_type,
            nats_url: get_or("NATS_URL", "nats://localhost:4222"),
            jetstream_stream: get_or("JETSTREAM_STREAM", "REPORTING"),
            jetstream_dlq_stream: get_or("JETSTREAM_DLQ_STREAM", "REPORTING_DLQ"),
            dead_letter_prefix: get_or("DEAD_LETTER_PREFIX", "dlq.reporting"),
            consumer_durable_name: get_or("CONSUMER_DURABLE_NAME", "report-generator"),
            consumer_ack_wait: Duration::from_secs(ack_wait_secs),
            requests_queue: get_or("REPORT_REQUESTS_QUEUE", "reporting.generation.requested"),
            completed_topic: get_or("REPORT_COMPLETED_TOPIC", "reporting.generation.completed"),
            storage_type,
            s3_endpoint: get("S3_ENDPOINT"),
            reports_container: get_or("GENERATED_REPORTS_CONTAINER", "generated-reports"),
            renderer_url,
            report_template: get_or("REPORT_TEMPLATE", "markup-report"),
            event_source: get_or("EVENT_SOURCE", DEFAULT_EVENT_SOURCE),
            unknown_event_policy,
            max_in_flight,
            log_format,
        })
    }
}
