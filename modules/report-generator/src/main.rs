use event_bus::{EventBus, InMemoryBus, JetStreamSettings, NatsBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use report_generator::{
    config::{Config, LogFormat},
    consumer::{ConsumerSettings, ReportRequestedConsumer},
    generation::HttpDocumentGenerator,
    lifecycle::{shutdown_signal, supervise},
    services::{ReportGenerationService, ReportSettings},
    storage::{InMemoryStorage, ObjectStorage, S3ObjectStorage},
};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or(LogFormat::Pretty));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        bus_type = %config.bus_type,
        storage_type = %config.storage_type,
        queue = %config.requests_queue,
        topic = %config.completed_topic,
        "Starting report generator"
    );

    // Create event bus
    let bus: Arc<dyn EventBus> = match config.bus_type.as_str() {
        "nats" => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            let settings = JetStreamSettings {
                stream_name: config.jetstream_stream.clone(),
                dlq_stream: config.jetstream_dlq_stream.clone(),
                dead_letter_prefix: config.dead_letter_prefix.clone(),
                durable_name: config.consumer_durable_name.clone(),
                ack_wait: config.consumer_ack_wait,
                ..Default::default()
            };
            Arc::new(
                NatsBus::connect(&config.nats_url, settings)
                    .await
                    .expect("Failed to connect to NATS"),
            )
        }
        _ => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let storage: Arc<dyn ObjectStorage> = match config.storage_type.as_str() {
        "s3" => Arc::new(S3ObjectStorage::from_env(config.s3_endpoint.as_deref()).await),
        _ => {
            tracing::info!("Using InMemory object storage");
            Arc::new(InMemoryStorage::new())
        }
    };

    let generator = Arc::new(
        HttpDocumentGenerator::new(&config.renderer_url, &config.report_template)
            .expect("Failed to build renderer client"),
    );

    let service = Arc::new(ReportGenerationService::new(
        bus.clone(),
        storage,
        generator,
        ReportSettings {
            completed_topic: config.completed_topic.clone(),
            reports_container: config.reports_container.clone(),
            event_source: config.event_source.clone(),
        },
    ));

    let consumer = ReportRequestedConsumer::new(
        bus,
        service,
        ConsumerSettings {
            queue: config.requests_queue.clone(),
            max_in_flight: config.max_in_flight,
            unknown_event_policy: config.unknown_event_policy,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let exit = supervise(handle, shutdown_tx, shutdown_signal(), Duration::from_secs(60)).await;
    if !exit.is_success() {
        tracing::error!(?exit, "Report generator exiting with failure");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
