pub mod config;
pub mod consumer;
pub mod contracts;
pub mod dlq;
pub mod generation;
pub mod lifecycle;
pub mod services;
pub mod storage;

pub use consumer::ReportRequestedConsumer;
pub use services::ReportGenerationService;
