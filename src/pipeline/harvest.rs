// src/pipeline/harvest.rs

//! One run of one source: discovery, the per-item loop, then finalization.
//!
//! ```text
//! (none) --create job--> initializing
//! initializing --discovery ok--> initialized
//! initializing --discovery failed--> failed
//! initialized --all items processed--> done | done-errors
//! ```
//!
//! Backend failures are recorded on the job and never returned to the
//! caller. Only problems found before the job exists (unknown source or
//! backend, invalid config, a job already running) surface as errors.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;

use crate::backends::{BackendRegistry, HarvestContext, RegisteredBackend};
use crate::error::{AppError, Result};
use crate::models::{HarvestError, Item, Job, JobSave, JobStart, JobStatus, RunConfig, Source, SourceRef};
use crate::signals::{HarvestEvent, Signals};
use crate::storage::{Catalog, SourceStore};

/// What happens to the job and to the mapped datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Persist the job and write datasets to the catalog
    Persist,
    /// Persist the job, only validate datasets
    DryRun,
    /// Keep nothing: capped discovery, validation only, no signals
    Preview,
}

impl RunMode {
    pub fn dry_run(self) -> bool {
        !matches!(self, RunMode::Persist)
    }

    fn persists_job(self) -> bool {
        !matches!(self, RunMode::Preview)
    }
}

/// How `drive` left the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Finished,
    /// The stored job was closed by someone else, stop writing to it
    Closed,
}

/// Drives harvest jobs.
pub struct Harvester {
    store: Arc<dyn SourceStore>,
    catalog: Arc<dyn Catalog>,
    registry: Arc<BackendRegistry>,
    signals: Signals,
    config: RunConfig,
}

impl Harvester {
    pub fn new(
        store: Arc<dyn SourceStore>,
        catalog: Arc<dyn Catalog>,
        registry: Arc<BackendRegistry>,
        signals: Signals,
        config: RunConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            registry,
            signals,
            config,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Harvest the source with id `source_id`.
    ///
    /// Returns the job in its terminal state. Backend failures, timeouts and
    /// panics end up in the job, not in the returned error.
    pub async fn harvest(&self, source_id: &str, mode: RunMode) -> Result<Job> {
        let source = self
            .store
            .get(source_id)
            .await?
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| AppError::not_found(format!("source {source_id}")))?;

        let registered = self.registry.get(&source.backend)?;
        registered
            .info()
            .validate_config(&source.config)
            .map_err(|errors| {
                let fields: Vec<String> = errors.iter().map(ToString::to_string).collect();
                AppError::configuration(format!(
                    "Source {} has an invalid config: {}",
                    source.slug,
                    fields.join("; ")
                ))
            })?;

        let now = Utc::now();
        let mut job = Job::new(now, mode.dry_run());

        if mode.persists_job() {
            let started = self
                .store
                .start_job(&source.id, job.clone(), now, self.config.stale_after())
                .await?;
            if let JobStart::Busy { job_id } = started {
                log::warn!("Refusing to harvest {}: job {} is still running", source.slug, job_id);
                return Err(AppError::AlreadyRunning {
                    slug: source.slug.clone(),
                    job_id,
                });
            }
            self.signals.publish(HarvestEvent::BeforeHarvestJob {
                source: SourceRef::from(&source),
                job_id: job.id.clone(),
            });
        }

        log::info!(
            "Harvesting {} with backend '{}' (job {}, {:?})",
            source.slug,
            source.backend,
            job.id,
            mode
        );

        let outcome = AssertUnwindSafe(self.drive(&source, &registered, &mut job, mode))
            .catch_unwind()
            .await;
        let mut closed = false;
        let unexpected = match outcome {
            Ok(Ok(flow)) => {
                closed = flow == Flow::Closed;
                None
            }
            Ok(Err(e)) => Some(HarvestError::new(format!("Unexpected error: {e}"), None)),
            Err(panic) => Some(HarvestError::new(
                "Unexpected error: harvest panicked",
                Some(panic_message(panic.as_ref())),
            )),
        };
        if !closed {
            if let Some(error) = unexpected {
                log::error!("Job {} of {} aborted: {}", job.id, source.slug, error.message);
                job.fail(Utc::now(), error);
            }

            job.finalize(Utc::now());
            match self.persist(&source, &job, mode).await {
                Ok(JobSave::Saved) => {}
                Ok(JobSave::Closed) => closed = true,
                Err(e) => log::error!("Unable to save final state of job {}: {}", job.id, e),
            }
        }

        if closed {
            log::warn!(
                "Job {} of {} was closed while still running, keeping the stored state",
                job.id,
                source.slug
            );
            job = self.stored_copy(&source, job).await;
        }

        log::info!(
            "Harvest of {} finished: {} ({} items, {} failed)",
            source.slug,
            job.status.as_str(),
            job.items.len(),
            job.failed_items()
        );

        if mode.persists_job() {
            self.signals.publish(HarvestEvent::AfterHarvestJob {
                source: SourceRef::from(&source),
                job_id: job.id.clone(),
                status: job.status,
            });
        }
        Ok(job)
    }

    async fn drive(
        &self,
        source: &Source,
        registered: &RegisteredBackend,
        job: &mut Job,
        mode: RunMode,
    ) -> Result<Flow> {
        let backend = registered.backend();
        let ctx = HarvestContext {
            source,
            client: registered.client(),
        };

        let mut discovered = match self.guarded("Discovery", backend.initialize(&ctx)).await {
            Ok(items) => items,
            Err(error) => {
                log::warn!("Discovery failed for {}: {}", source.slug, error.message);
                job.fail(Utc::now(), error);
                return Ok(Flow::Finished);
            }
        };

        if let Some(limit) = self.item_limit(mode) {
            if discovered.len() > limit {
                log::info!(
                    "Keeping {} of {} discovered items for {}",
                    limit,
                    discovered.len(),
                    source.slug
                );
                discovered.truncate(limit);
            }
        }

        job.items = discovered.into_iter().map(Item::from).collect();
        job.status = JobStatus::Initialized;
        if self.persist(source, job, mode).await? == JobSave::Closed {
            return Ok(Flow::Closed);
        }

        for index in 0..job.items.len() {
            job.items[index].start(Utc::now());
            if self.persist(source, job, mode).await? == JobSave::Closed {
                return Ok(Flow::Closed);
            }

            let item = job.items[index].clone();
            let outcome = match self.guarded("Processing", backend.process(&ctx, &item)).await {
                Ok(dataset) => match dataset.validate() {
                    Err(e) => Err(HarvestError::from(e)),
                    Ok(()) if mode.dry_run() => Ok(None),
                    Ok(()) => self
                        .catalog
                        .save(source, &dataset)
                        .await
                        .map(Some)
                        .map_err(|e| HarvestError::new(format!("Unable to save dataset: {e}"), None)),
                },
                Err(error) => Err(error),
            };

            let now = Utc::now();
            match outcome {
                Ok(dataset_id) => {
                    job.items[index].succeed(now, dataset_id);
                }
                Err(error) => {
                    log::warn!(
                        "Item {} of {} failed: {}",
                        item.remote_id,
                        source.slug,
                        error.message
                    );
                    job.items[index].fail(now, error);
                }
            }
            if self.persist(source, job, mode).await? == JobSave::Closed {
                return Ok(Flow::Closed);
            }
        }

        Ok(Flow::Finished)
    }

    /// Run a backend call under the call timeout, turning panics into errors.
    async fn guarded<T, E>(
        &self,
        what: &str,
        call: impl Future<Output = std::result::Result<T, E>>,
    ) -> std::result::Result<T, HarvestError>
    where
        E: Into<HarvestError>,
    {
        let limit = self.config.call_timeout();
        match tokio::time::timeout(limit, AssertUnwindSafe(call).catch_unwind()).await {
            Err(_) => Err(HarvestError::new(
                format!("{what} timed out after {}s", limit.as_secs()),
                None,
            )),
            Ok(Err(panic)) => Err(HarvestError::new(
                format!("{what} panicked"),
                Some(panic_message(panic.as_ref())),
            )),
            Ok(Ok(result)) => result.map_err(Into::into),
        }
    }

    fn item_limit(&self, mode: RunMode) -> Option<usize> {
        match mode {
            RunMode::Preview => Some(
                self.config
                    .max_items
                    .map_or(self.config.preview_max_items, |max| max.min(self.config.preview_max_items)),
            ),
            _ => self.config.max_items,
        }
    }

    async fn persist(&self, source: &Source, job: &Job, mode: RunMode) -> Result<JobSave> {
        if !mode.persists_job() {
            return Ok(JobSave::Saved);
        }
        self.store.save_job(&source.id, job).await
    }

    /// The job as currently stored, or `job` itself if it cannot be read.
    async fn stored_copy(&self, source: &Source, job: Job) -> Job {
        match self.store.get(&source.id).await {
            Ok(Some(stored)) => stored.job(&job.id).cloned().unwrap_or(job),
            _ => job,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::backends::{Backend, BackendInfo, RemoteItem};
    use crate::error::{DiscoveryError, ItemError};
    use crate::models::{Dataset, FilterValue, HttpConfig, ItemStatus, fixtures};
    use crate::signals::ChannelSink;
    use crate::storage::MemoryStore;

    /// Backend whose behaviour is fixed by the test.
    struct Scripted {
        info: BackendInfo,
        ids: std::result::Result<Vec<&'static str>, &'static str>,
        failing: Vec<&'static str>,
        panicking: Vec<&'static str>,
        slow: Vec<&'static str>,
        invalid: Vec<&'static str>,
    }

    impl Scripted {
        fn new(ids: &[&'static str]) -> Self {
            Self {
                info: BackendInfo::new("scripted", "Scripted"),
                ids: Ok(ids.to_vec()),
                failing: Vec::new(),
                panicking: Vec::new(),
                slow: Vec::new(),
                invalid: Vec::new(),
            }
        }

        fn unreachable() -> Self {
            Self {
                ids: Err("remote unreachable"),
                ..Self::new(&[])
            }
        }
    }

    #[async_trait]
    impl Backend for Scripted {
        fn info(&self) -> &BackendInfo {
            &self.info
        }

        async fn initialize(
            &self,
            _ctx: &HarvestContext<'_>,
        ) -> std::result::Result<Vec<RemoteItem>, DiscoveryError> {
            match &self.ids {
                Ok(ids) => Ok(ids.iter().map(|id| RemoteItem::new(*id)).collect()),
                Err(message) => Err(DiscoveryError::new(*message).with_details("connection refused")),
            }
        }

        async fn process(
            &self,
            _ctx: &HarvestContext<'_>,
            item: &Item,
        ) -> std::result::Result<Dataset, ItemError> {
            let id = item.remote_id.as_str();
            if self.panicking.contains(&id) {
                panic!("boom on {id}");
            }
            if self.slow.contains(&id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.contains(&id) {
                return Err(ItemError::new(format!("cannot fetch {id}")));
            }
            let title = if self.invalid.contains(&id) { "" } else { id };
            Ok(Dataset {
                remote_id: id.to_string(),
                title: title.to_string(),
                ..Dataset::default()
            })
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        harvester: Harvester,
        events: tokio::sync::mpsc::UnboundedReceiver<HarvestEvent>,
        source: Source,
    }

    async fn fixture(backend: Scripted, config: RunConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut source = fixtures::source("portal");
        source.backend = "scripted".into();
        store.insert(&source).await.unwrap();

        let mut registry = BackendRegistry::new(HttpConfig::default());
        registry.register(backend).unwrap();
        let (sink, events) = ChannelSink::new();

        let harvester = Harvester::new(
            store.clone(),
            store.clone(),
            Arc::new(registry),
            Signals::new().with_sink(sink),
            config,
        );
        Fixture {
            store,
            harvester,
            events,
            source,
        }
    }

    #[tokio::test]
    async fn partial_failure_is_isolated() {
        let mut backend = Scripted::new(&["a", "b", "c"]);
        backend.failing.push("b");
        let mut fx = fixture(backend, RunConfig::default()).await;

        let job = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();

        assert_eq!(job.status, JobStatus::DoneErrors);
        assert_eq!(job.items.len(), 3);
        assert_eq!(job.failed_items(), 1);
        assert!(job.items[1].errors[0].message.contains("cannot fetch b"));
        assert_eq!(job.items[1].status, ItemStatus::Failed);
        assert!(job.items[0].errors.is_empty() && job.items[2].errors.is_empty());
        assert_eq!(job.items[0].dataset_id.as_deref(), Some("portal/a"));
        assert!(job.ended.is_some());

        let stored = fx.store.get(&fx.source.id).await.unwrap().unwrap();
        assert_eq!(stored.jobs, vec![job.clone()]);
        assert_eq!(fx.store.dataset_count().await, 2);

        assert_eq!(fx.events.try_recv().unwrap().name(), "before_harvest_job");
        match fx.events.try_recv().unwrap() {
            HarvestEvent::AfterHarvestJob { status, job_id, .. } => {
                assert_eq!(status, JobStatus::DoneErrors);
                assert_eq!(job_id, job.id);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn discovery_failure_fails_job_without_items() {
        let mut fx = fixture(Scripted::unreachable(), RunConfig::default()).await;

        let job = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.items.is_empty());
        assert_eq!(job.errors.len(), 1);
        assert_eq!(job.errors[0].message, "remote unreachable");
        assert_eq!(job.errors[0].details.as_deref(), Some("connection refused"));

        fx.events.try_recv().unwrap();
        assert!(matches!(
            fx.events.try_recv().unwrap(),
            HarvestEvent::AfterHarvestJob { status: JobStatus::Failed, .. }
        ));

        // The source stays runnable.
        let again = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();
        assert_eq!(again.status, JobStatus::Failed);
        let stored = fx.store.get(&fx.source.id).await.unwrap().unwrap();
        assert_eq!(stored.jobs.len(), 2);
    }

    #[tokio::test]
    async fn sequential_runs_append_in_order() {
        let fx = fixture(Scripted::new(&["a"]), RunConfig::default()).await;

        let first = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();
        let second = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();

        let stored = fx.store.get(&fx.source.id).await.unwrap().unwrap();
        let ids: Vec<_> = stored.jobs.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert!(stored.jobs.iter().all(|j| j.status == JobStatus::Done));
        assert!(stored.running_job().is_none());
    }

    #[tokio::test]
    async fn refuses_when_fresh_job_running() {
        let fx = fixture(Scripted::new(&["a"]), RunConfig::default()).await;
        let now = Utc::now();
        let running = Job::new(now, false);
        fx.store
            .start_job(&fx.source.id, running.clone(), now, chrono::Duration::hours(1))
            .await
            .unwrap();

        let err = fx
            .harvester
            .harvest(&fx.source.id, RunMode::Persist)
            .await
            .unwrap_err();
        match err {
            AppError::AlreadyRunning { job_id, .. } => assert_eq!(job_id, running.id),
            other => panic!("unexpected error {other}"),
        }
        let stored = fx.store.get(&fx.source.id).await.unwrap().unwrap();
        assert_eq!(stored.jobs.len(), 1);
    }

    #[tokio::test]
    async fn stale_job_is_abandoned() {
        let fx = fixture(Scripted::new(&["a"]), RunConfig::default()).await;
        let long_ago = Utc::now() - chrono::Duration::hours(7);
        let stale = Job::new(long_ago, false);
        fx.store
            .start_job(&fx.source.id, stale.clone(), long_ago, chrono::Duration::hours(1))
            .await
            .unwrap();

        let job = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);

        let stored = fx.store.get(&fx.source.id).await.unwrap().unwrap();
        let old = stored.job(&stale.id).unwrap();
        assert_eq!(old.status, JobStatus::Failed);
        assert!(old.errors[0].message.starts_with("Job abandoned"));
        assert_eq!(stored.jobs.iter().filter(|j| j.is_running()).count(), 0);
    }

    /// Backend whose first item outlives the staleness threshold: while it
    /// is being processed another run starts and closes the job.
    struct Overtaken {
        info: BackendInfo,
        store: Arc<MemoryStore>,
        source_id: String,
        at: chrono::DateTime<Utc>,
        processed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Backend for Overtaken {
        fn info(&self) -> &BackendInfo {
            &self.info
        }

        async fn initialize(
            &self,
            _ctx: &HarvestContext<'_>,
        ) -> std::result::Result<Vec<RemoteItem>, DiscoveryError> {
            Ok(vec![RemoteItem::new("a"), RemoteItem::new("b")])
        }

        async fn process(
            &self,
            _ctx: &HarvestContext<'_>,
            item: &Item,
        ) -> std::result::Result<Dataset, ItemError> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            let started = self
                .store
                .start_job(&self.source_id, Job::new(self.at, false), self.at, chrono::Duration::hours(6))
                .await
                .unwrap();
            assert_eq!(started, JobStart::Started);
            Ok(Dataset {
                remote_id: item.remote_id.clone(),
                title: item.remote_id.clone(),
                ..Dataset::default()
            })
        }
    }

    #[tokio::test]
    async fn overridden_job_is_not_revived() {
        let store = Arc::new(MemoryStore::new());
        let mut source = fixtures::source("portal");
        source.backend = "overtaken".into();
        store.insert(&source).await.unwrap();

        let at = Utc::now() + chrono::Duration::hours(7);
        let processed = Arc::new(AtomicUsize::new(0));
        let backend = Overtaken {
            info: BackendInfo::new("overtaken", "Overtaken"),
            store: store.clone(),
            source_id: source.id.clone(),
            at,
            processed: processed.clone(),
        };
        let mut registry = BackendRegistry::new(HttpConfig::default());
        registry.register(backend).unwrap();
        let (sink, mut events) = ChannelSink::new();
        let harvester = Harvester::new(
            store.clone(),
            store.clone(),
            Arc::new(registry),
            Signals::new().with_sink(sink),
            RunConfig::default(),
        );

        let job = harvester.harvest(&source.id, RunMode::Persist).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.ended, Some(at));
        assert!(job.errors[0].message.starts_with("Job abandoned"));

        let stored = store.get(&source.id).await.unwrap().unwrap();
        assert_eq!(stored.jobs.len(), 2);
        let old = stored.job(&job.id).unwrap();
        assert_eq!(old.status, JobStatus::Failed);
        assert_eq!(old.ended, Some(at));
        assert_eq!(stored.jobs.iter().filter(|j| j.is_running()).count(), 1);
        assert_eq!(stored.running_job().map(|j| j.started), Some(at));

        // The run stops at the first write refused after the override.
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        assert_eq!(job.items[0].status, ItemStatus::Started);
        assert_eq!(job.items[1].status, ItemStatus::Pending);

        events.try_recv().unwrap();
        assert!(matches!(
            events.try_recv().unwrap(),
            HarvestEvent::AfterHarvestJob { status: JobStatus::Failed, .. }
        ));
    }

    #[tokio::test]
    async fn panicking_item_is_recorded() {
        let mut backend = Scripted::new(&["a", "b"]);
        backend.panicking.push("a");
        let fx = fixture(backend, RunConfig::default()).await;

        let job = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();

        assert_eq!(job.status, JobStatus::DoneErrors);
        assert_eq!(job.items[0].errors[0].message, "Processing panicked");
        assert_eq!(job.items[0].errors[0].details.as_deref(), Some("boom on a"));
        assert_eq!(job.items[1].status, ItemStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_item_times_out() {
        let mut backend = Scripted::new(&["a", "b"]);
        backend.slow.push("a");
        let config = RunConfig {
            call_timeout_secs: 5,
            ..RunConfig::default()
        };
        let fx = fixture(backend, config).await;

        let job = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();

        assert_eq!(job.items[0].status, ItemStatus::Failed);
        assert_eq!(job.items[0].errors[0].message, "Processing timed out after 5s");
        assert_eq!(job.items[1].status, ItemStatus::Done);
    }

    #[tokio::test]
    async fn dry_run_writes_no_dataset() {
        let mut backend = Scripted::new(&["a", "b"]);
        backend.invalid.push("b");
        let fx = fixture(backend, RunConfig::default()).await;

        let job = fx.harvester.harvest(&fx.source.id, RunMode::DryRun).await.unwrap();

        assert!(job.dry_run);
        assert_eq!(job.status, JobStatus::DoneErrors);
        assert_eq!(job.items[0].status, ItemStatus::Done);
        assert_eq!(job.items[0].dataset_id, None);
        assert!(job.items[1].errors[0].message.contains("title"));
        assert_eq!(fx.store.dataset_count().await, 0);
        assert_eq!(fx.store.get(&fx.source.id).await.unwrap().unwrap().jobs.len(), 1);
    }

    #[tokio::test]
    async fn preview_is_capped_and_not_persisted() {
        let config = RunConfig {
            preview_max_items: 2,
            ..RunConfig::default()
        };
        let mut fx = fixture(Scripted::new(&["a", "b", "c"]), config).await;

        let job = fx.harvester.harvest(&fx.source.id, RunMode::Preview).await.unwrap();

        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.items.len(), 2);
        assert!(fx.store.get(&fx.source.id).await.unwrap().unwrap().jobs.is_empty());
        assert_eq!(fx.store.dataset_count().await, 0);
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn max_items_caps_discovery() {
        let config = RunConfig {
            max_items: Some(1),
            ..RunConfig::default()
        };
        let fx = fixture(Scripted::new(&["a", "b", "c"]), config).await;

        let job = fx.harvester.harvest(&fx.source.id, RunMode::Persist).await.unwrap();
        assert_eq!(job.items.len(), 1);
        assert_eq!(job.items[0].remote_id, "a");
    }

    #[tokio::test]
    async fn errors_before_job_creation() {
        let fx = fixture(Scripted::new(&["a"]), RunConfig::default()).await;

        assert!(matches!(
            fx.harvester.harvest("missing", RunMode::Persist).await,
            Err(AppError::NotFound(_))
        ));

        let mut orphan = fixtures::source("orphan");
        orphan.backend = "gone".into();
        fx.store.insert(&orphan).await.unwrap();
        assert!(matches!(
            fx.harvester.harvest(&orphan.id, RunMode::Persist).await,
            Err(AppError::Configuration(_))
        ));

        let mut misconfigured = fixtures::source("misconfigured");
        misconfigured.backend = "scripted".into();
        misconfigured.config.filters.push(FilterValue::include("color", "red"));
        fx.store.insert(&misconfigured).await.unwrap();
        assert!(matches!(
            fx.harvester.harvest(&misconfigured.id, RunMode::Persist).await,
            Err(AppError::Configuration(_))
        ));

        for id in [&orphan.id, &misconfigured.id] {
            assert!(fx.store.get(id).await.unwrap().unwrap().jobs.is_empty());
        }
    }
}
