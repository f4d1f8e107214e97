//! Harvest pipeline.
//!
//! - [`Harvester`]: drives one job of one source end-to-end

pub mod harvest;

pub use harvest::{Harvester, RunMode};
