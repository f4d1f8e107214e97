//! Local filesystem storage implementation.
//!
//! Every source is one pretty-printed JSON document holding its job history.
//! Writes go to a temp file which is then renamed over the target, so a
//! crashed process never leaves a half-written source behind.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── sources/
//! │   └── {source_id}.json
//! └── datasets/
//!     └── {source_slug}/
//!         └── {remote_id}.json
//! ```
//!
//! Read-modify-write cycles are serialised by one in-process lock, which is
//! what makes the job guard atomic. Two processes sharing a directory are not
//! coordinated.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Dataset, Job, JobSave, JobStart, Source, SourceField, SourceQuery};

use super::{Catalog, SourceStore, dataset_key};

const SOURCES_DIR: &str = "sources";
const DATASETS_DIR: &str = "datasets";

/// Local filesystem storage backend.
pub struct LocalStorage {
    root_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn source_key(id: &str) -> String {
        format!("{SOURCES_DIR}/{id}.json")
    }

    /// Source ids become file names, so only plain id characters are allowed.
    fn is_valid_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_source(&self, id: &str) -> Result<Option<Source>> {
        if !Self::is_valid_id(id) {
            return Ok(None);
        }
        self.read_json(&Self::source_key(id)).await
    }

    async fn write_source(&self, source: &Source) -> Result<()> {
        self.write_json(&Self::source_key(&source.id), source).await
    }

    /// Every stored source, in no particular order.
    async fn load_all(&self) -> Result<Vec<Source>> {
        let dir = self.path(SOURCES_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut sources = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Source>(&bytes) {
                Ok(source) => sources.push(source),
                Err(e) => log::warn!("Skipping unreadable source file {}: {}", path.display(), e),
            }
        }
        Ok(sources)
    }

    /// Load, modify and write back one source under the write lock.
    async fn modify<T>(&self, id: &str, f: impl FnOnce(&mut Source) -> Result<T> + Send) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut source = self
            .read_source(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("source {id}")))?;
        let out = f(&mut source)?;
        self.write_source(&source).await?;
        Ok(out)
    }
}

#[async_trait]
impl SourceStore for LocalStorage {
    async fn insert(&self, source: &Source) -> Result<()> {
        if !Self::is_valid_id(&source.id) {
            return Err(AppError::invalid("id", format!("'{}' is not a valid source id", source.id)));
        }
        let _guard = self.write_lock.lock().await;
        if self.read_source(&source.id).await?.is_some() {
            return Err(AppError::store(format!("Source id {} already exists", source.id)));
        }
        if self.load_all().await?.iter().any(|s| s.slug == source.slug) {
            return Err(AppError::invalid("slug", format!("'{}' is already taken", source.slug)));
        }
        self.write_source(source).await
    }

    async fn get(&self, id: &str) -> Result<Option<Source>> {
        self.read_source(id).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Source>> {
        Ok(self.load_all().await?.into_iter().find(|s| s.slug == slug))
    }

    async fn list(&self, query: &SourceQuery) -> Result<Vec<Source>> {
        let mut found: Vec<Source> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| query.matches(s))
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn update_field(&self, id: &str, field: SourceField) -> Result<Source> {
        self.modify(id, |source| {
            source.apply(field);
            Ok(source.clone())
        })
        .await
    }

    async fn start_job(
        &self,
        id: &str,
        job: Job,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<JobStart> {
        self.modify(id, |source| Ok(source.try_start_job(job, now, stale_after)))
            .await
    }

    async fn save_job(&self, id: &str, job: &Job) -> Result<JobSave> {
        self.modify(id, |source| {
            source
                .replace_job(job)
                .ok_or_else(|| AppError::not_found(format!("job {} of source {}", job.id, source.id)))
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        if !Self::is_valid_id(id) {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path(&Self::source_key(id))).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl Catalog for LocalStorage {
    async fn save(&self, source: &Source, dataset: &Dataset) -> Result<String> {
        let key = dataset_key(source, dataset);
        self.write_json(&format!("{DATASETS_DIR}/{key}.json"), dataset)
            .await?;
        log::debug!("Saved dataset {}", key);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, fixtures};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!tmp.path().join("test.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.read_bytes("nope.txt").await.unwrap().is_none());
        assert!(storage.list(&SourceQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let source = fixtures::source("portal");
        {
            let storage = LocalStorage::new(tmp.path());
            storage.insert(&source).await.unwrap();
            storage
                .update_field(&source.id, SourceField::Name("Portal".into()))
                .await
                .unwrap();
        }

        let storage = LocalStorage::new(tmp.path());
        let loaded = storage.find_by_slug("portal").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Portal");
        assert!(tmp.path().join("sources/id-portal.json").exists());
    }

    #[tokio::test]
    async fn test_job_guard_and_save() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = fixtures::source("portal");
        storage.insert(&source).await.unwrap();
        let now = Utc::now();

        let mut job = Job::new(now, false);
        assert_eq!(
            storage
                .start_job(&source.id, job.clone(), now, Duration::hours(1))
                .await
                .unwrap(),
            JobStart::Started
        );
        assert!(matches!(
            storage
                .start_job(&source.id, Job::new(now, false), now, Duration::hours(1))
                .await
                .unwrap(),
            JobStart::Busy { .. }
        ));

        job.finalize(now);
        assert_eq!(storage.save_job(&source.id, &job).await.unwrap(), JobSave::Saved);
        let loaded = storage.get(&source.id).await.unwrap().unwrap();
        assert_eq!(loaded.jobs[0].status, JobStatus::Done);

        let unknown = Job::new(now, false);
        assert!(matches!(
            storage.save_job(&source.id, &unknown).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_job_stays_closed() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = fixtures::source("portal");
        storage.insert(&source).await.unwrap();
        let now = Utc::now();
        let long_ago = now - Duration::hours(7);

        let old = Job::new(long_ago, false);
        storage
            .start_job(&source.id, old.clone(), long_ago, Duration::hours(6))
            .await
            .unwrap();
        storage
            .start_job(&source.id, Job::new(now, false), now, Duration::hours(6))
            .await
            .unwrap();

        let mut late = old.clone();
        late.status = JobStatus::Initialized;
        late.ended = None;
        assert_eq!(storage.save_job(&source.id, &late).await.unwrap(), JobSave::Closed);

        let stored = storage.get(&source.id).await.unwrap().unwrap();
        assert_eq!(stored.job(&old.id).unwrap().status, JobStatus::Failed);
        assert_eq!(stored.jobs.iter().filter(|j| j.is_running()).count(), 1);
    }

    #[tokio::test]
    async fn test_catalog_writes_datasets() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = fixtures::source("portal");
        let dataset = Dataset {
            remote_id: "abc".into(),
            title: "ABC".into(),
            ..Dataset::default()
        };

        let key = storage.save(&source, &dataset).await.unwrap();
        assert_eq!(key, "portal/abc");
        let stored: Dataset = storage
            .read_json("datasets/portal/abc.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, "ABC");
    }

    #[tokio::test]
    async fn test_ids_stay_inside_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("store");
        let storage = LocalStorage::new(&root);

        let outside = fixtures::source("outside");
        tokio::fs::create_dir_all(tmp.path()).await.unwrap();
        tokio::fs::write(tmp.path().join("x.json"), serde_json::to_vec(&outside).unwrap())
            .await
            .unwrap();

        for id in ["../../x", "../x", "a/b", "", ".."] {
            assert!(storage.get(id).await.unwrap().is_none(), "{id}");
            assert!(!storage.remove(id).await.unwrap(), "{id}");
        }
        assert!(tmp.path().join("x.json").exists());

        let mut bad = fixtures::source("bad");
        bad.id = "../escape".into();
        assert!(matches!(storage.insert(&bad).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let source = fixtures::source("portal");
        storage.insert(&source).await.unwrap();

        assert!(storage.remove(&source.id).await.unwrap());
        assert!(!storage.remove(&source.id).await.unwrap());
        assert!(storage.get(&source.id).await.unwrap().is_none());
    }
}
