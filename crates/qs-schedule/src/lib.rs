//! Ingestion pipeline and the scheduler that drives it
//!
//! The pipeline is the only component that writes classification results;
//! the scheduler fires it on a fixed interval, one cycle at a time.

mod config;
mod error;
mod pipeline;
mod scheduler;

#[cfg(test)]
mod testing;

pub use config::PipelineSettings;
pub use error::{Result, ScheduleError};
pub use pipeline::{CycleReport, CycleRunner, IngestionPipeline};
pub use scheduler::{MonitorStatus, MonitoringScheduler};
