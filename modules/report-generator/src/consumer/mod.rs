pub mod report_requested_consumer;

pub use report_requested_consumer::{
    ConsumerSettings, Disposition, ProcessingError, ReportRequestedConsumer, UnknownEventPolicy,
};
