// src/models/mod.rs

//! Domain models for the harvesting engine.
//!
//! Sources own their jobs, jobs own their items and errors. Datasets are what
//! backends produce and what the surrounding catalog stores.

mod config;
mod dataset;
mod job;
mod schedule;
mod source;

// Re-export all public types
pub use config::{HarvestConfig, HttpConfig, LoggingConfig, RunConfig, SchedulerConfig, StorageConfig};
pub use dataset::{Dataset, Resource};
pub use job::{HarvestError, Item, ItemStatus, Job, JobStatus};
pub use schedule::{Crontab, Frequency, HARVEST_TASK, Interval, Period, PeriodicTask, Trigger, task_name};
pub use source::{
    FilterMode, FilterValue, JobSave, JobStart, Owner, Source, SourceConfig, SourceField, SourceQuery,
    SourceRef, Validation, ValidationState,
};

#[cfg(test)]
pub(crate) use source::fixtures;
