// src/lib.rs

//! Catalog harvesting engine.
//!
//! Pulls dataset catalogs from remote portals into a local store through
//! pluggable backends, tracking every run as a job with per-item outcomes.
//!
//! - [`actions::HarvestActions`]: the facade used by the CLI and the worker
//! - [`pipeline::Harvester`]: runs one job of one source
//! - [`backends`]: the backend contract, the registry and bundled backends
//! - [`scheduler`]: periodic triggers, the task queue and its worker

pub mod actions;
pub mod backends;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod signals;
pub mod storage;
pub mod utils;

pub use actions::{HarvestActions, JobPage, NewSource, SourceEdit};
pub use error::{AppError, Result};
