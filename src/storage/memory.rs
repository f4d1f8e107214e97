//! In-process store, used by tests and single-shot CLI runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::models::{Dataset, Job, JobSave, JobStart, Source, SourceField, SourceQuery};

use super::{Catalog, SourceStore, dataset_key};

/// Sources and datasets kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<HashMap<String, Source>>,
    datasets: RwLock<HashMap<String, Dataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dataset saved under `key`, if any.
    pub async fn dataset(&self, key: &str) -> Option<Dataset> {
        self.datasets.read().await.get(key).cloned()
    }

    pub async fn dataset_count(&self) -> usize {
        self.datasets.read().await.len()
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn insert(&self, source: &Source) -> Result<()> {
        let mut sources = self.sources.write().await;
        if sources.contains_key(&source.id) {
            return Err(AppError::store(format!("Source id {} already exists", source.id)));
        }
        if sources.values().any(|s| s.slug == source.slug) {
            return Err(AppError::invalid("slug", format!("'{}' is already taken", source.slug)));
        }
        sources.insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.sources.read().await.get(id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Source>> {
        Ok(self
            .sources
            .read()
            .await
            .values()
            .find(|s| s.slug == slug)
            .cloned())
    }

    async fn list(&self, query: &SourceQuery) -> Result<Vec<Source>> {
        let mut found: Vec<Source> = self
            .sources
            .read()
            .await
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn update_field(&self, id: &str, field: SourceField) -> Result<Source> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("source {id}")))?;
        source.apply(field);
        Ok(source.clone())
    }

    async fn start_job(
        &self,
        id: &str,
        job: Job,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<JobStart> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("source {id}")))?;
        Ok(source.try_start_job(job, now, stale_after))
    }

    async fn save_job(&self, id: &str, job: &Job) -> Result<JobSave> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("source {id}")))?;
        source
            .replace_job(job)
            .ok_or_else(|| AppError::not_found(format!("job {} of source {id}", job.id)))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.sources.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn save(&self, source: &Source, dataset: &Dataset) -> Result<String> {
        let key = dataset_key(source, dataset);
        self.datasets.write().await.insert(key.clone(), dataset.clone());
        Ok(key)
    }
}
