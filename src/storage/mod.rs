//! Persistence of sources and of harvested datasets.
//!
//! Sources embed their job history, so a store only deals with whole source
//! documents plus a few atomic primitives:
//!
//! - single-field updates ([`SourceStore::update_field`])
//! - the guarded job append used by the concurrency guard ([`SourceStore::start_job`])
//! - replacement of one embedded job that has not ended ([`SourceStore::save_job`])
//!
//! ## Directory Structure (local storage)
//!
//! ```text
//! storage/
//! ├── sources/
//! │   └── {source_id}.json      # Source with its embedded jobs
//! └── datasets/
//!     └── {source_slug}/
//!         └── {remote_id}.json  # Mapped dataset
//! ```

pub mod local;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::{Dataset, Job, JobSave, JobStart, Source, SourceField, SourceQuery};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStore;

/// Document store holding sources.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Persist a new source. Fails if the id or the slug is already taken.
    async fn insert(&self, source: &Source) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Source>>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Source>>;

    /// Sources matching `query`, oldest first.
    async fn list(&self, query: &SourceQuery) -> Result<Vec<Source>>;

    /// Set one field and return the updated source.
    async fn update_field(&self, id: &str, field: SourceField) -> Result<Source>;

    /// Append `job` unless a fresh non-terminal job exists, in one step.
    async fn start_job(
        &self,
        id: &str,
        job: Job,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<JobStart>;

    /// Overwrite the embedded job carrying the same id, unless the stored
    /// copy has already ended.
    async fn save_job(&self, id: &str, job: &Job) -> Result<JobSave>;

    /// Hard-remove a source. Returns whether it existed.
    async fn remove(&self, id: &str) -> Result<bool>;
}

/// Destination of mapped datasets.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Store `dataset` harvested from `source`, returning its local id.
    async fn save(&self, source: &Source, dataset: &Dataset) -> Result<String>;
}

/// Local id given to a dataset harvested from `source`.
pub fn dataset_key(source: &Source, dataset: &Dataset) -> String {
    format!("{}/{}", source.slug, sanitize(&dataset.remote_id))
}

/// Make a remote identifier usable as a file name.
fn sanitize(remote_id: &str) -> String {
    remote_id
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    #[test]
    fn dataset_keys_are_file_safe() {
        let source = fixtures::source("portal");
        let dataset = Dataset {
            remote_id: "a/b c:1".into(),
            ..Dataset::default()
        };
        assert_eq!(dataset_key(&source, &dataset), "portal/a_b_c_1");
    }
}
