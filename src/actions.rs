// src/actions.rs

//! Entry points used by the CLI, the worker and any embedding service.
//!
//! Sources are addressed by id or slug. Validation, not-found and
//! configuration problems are returned as [`AppError`]s; harvest outcomes are
//! returned as jobs.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::backends::{BackendInfo, BackendRegistry};
use crate::error::{AppError, FieldError, Result};
use crate::models::{
    Frequency, Job, Owner, PeriodicTask, RunConfig, Source, SourceConfig, SourceField, SourceQuery,
    SourceRef, Trigger, Validation, ValidationState,
};
use crate::pipeline::{Harvester, RunMode};
use crate::scheduler::{Scheduler, TaskQueue};
use crate::signals::{HarvestEvent, Signals};
use crate::storage::{Catalog, SourceStore};
use crate::utils::{is_absolute_url, slug_candidates, slugify};

/// Fallback slug for names without any alphanumeric character.
const DEFAULT_SLUG: &str = "source";

/// Fields of a source to create.
#[derive(Debug, Clone, Default)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    pub backend: String,
    pub description: String,
    pub frequency: Frequency,
    pub owner: Option<Owner>,
    pub config: SourceConfig,
}

/// Fields to change on an existing source. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct SourceEdit {
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub frequency: Option<Frequency>,
    pub config: Option<SourceConfig>,
    pub active: Option<bool>,
}

/// One page of a source's job history, newest first.
#[derive(Debug, Clone)]
pub struct JobPage {
    /// 1-based
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub jobs: Vec<Job>,
}

/// Facade over the store, the orchestrator and the scheduler.
pub struct HarvestActions {
    store: Arc<dyn SourceStore>,
    harvester: Harvester,
    scheduler: Scheduler,
    signals: Signals,
}

impl HarvestActions {
    pub fn new(
        store: Arc<dyn SourceStore>,
        catalog: Arc<dyn Catalog>,
        registry: Arc<BackendRegistry>,
        queue: Arc<dyn TaskQueue>,
        signals: Signals,
        config: RunConfig,
    ) -> Self {
        let harvester = Harvester::new(store.clone(), catalog, registry, signals.clone(), config);
        Self {
            store,
            harvester,
            scheduler: Scheduler::new(queue),
            signals,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn registry(&self) -> &BackendRegistry {
        self.harvester.registry()
    }

    // --- Sources ---

    pub async fn list_sources(&self, query: &SourceQuery) -> Result<Vec<Source>> {
        self.store.list(query).await
    }

    /// Source by id, or by slug when no id matches. Deleted sources included.
    pub async fn get_source(&self, ident: &str) -> Result<Source> {
        if let Some(source) = self.store.get(ident).await? {
            return Ok(source);
        }
        self.store
            .find_by_slug(ident)
            .await?
            .ok_or_else(|| AppError::not_found(format!("source '{ident}'")))
    }

    async fn get_live_source(&self, ident: &str) -> Result<Source> {
        let source = self.get_source(ident).await?;
        if source.is_deleted() {
            return Err(AppError::not_found(format!("source '{ident}' (deleted)")));
        }
        Ok(source)
    }

    /// Validate and persist a new source in pending state.
    ///
    /// An unknown backend is reported as a `Validation` error on field
    /// `backend`, together with any other offending field, rather than as a
    /// `Configuration` error. `Configuration` is kept for sources that reach
    /// a run with a backend that is no longer registered.
    pub async fn create_source(&self, new: NewSource) -> Result<Source> {
        let mut errors = Vec::new();
        check_name(&new.name, &mut errors);
        check_url(&new.url, &mut errors);
        self.check_backend(&new.backend, &new.config, &mut errors);
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let name = new.name.trim().to_string();
        let slug = self.unique_slug(&name).await?;
        let source = Source {
            id: Uuid::new_v4().to_string(),
            slug,
            name,
            url: new.url.trim().to_string(),
            description: new.description,
            backend: new.backend,
            frequency: new.frequency,
            owner: new.owner,
            config: new.config,
            active: true,
            created_at: Utc::now(),
            deleted: None,
            validation: Validation::default(),
            periodic_task: None,
            jobs: Vec::new(),
        };
        self.store.insert(&source).await?;

        log::info!("Created source {} ({})", source.slug, source.id);
        self.signals.publish(HarvestEvent::SourceCreated {
            source: SourceRef::from(&source),
        });
        Ok(source)
    }

    async fn unique_slug(&self, name: &str) -> Result<String> {
        let base = match slugify(name) {
            slug if slug.is_empty() => DEFAULT_SLUG.to_string(),
            slug => slug,
        };
        for candidate in slug_candidates(&base) {
            if self.store.find_by_slug(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(AppError::store(format!("no free slug for '{base}'")))
    }

    /// Apply an edit with the same checks as creation. The slug never changes.
    pub async fn update_source(&self, ident: &str, edit: SourceEdit) -> Result<Source> {
        let source = self.get_live_source(ident).await?;

        let mut errors = Vec::new();
        if let Some(name) = &edit.name {
            check_name(name, &mut errors);
        }
        if let Some(url) = &edit.url {
            check_url(url, &mut errors);
        }
        if let Some(config) = &edit.config {
            self.check_backend(&source.backend, config, &mut errors);
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let mut fields = Vec::new();
        if let Some(name) = edit.name {
            fields.push(SourceField::Name(name.trim().to_string()));
        }
        if let Some(url) = edit.url {
            fields.push(SourceField::Url(url.trim().to_string()));
        }
        if let Some(description) = edit.description {
            fields.push(SourceField::Description(description));
        }
        if let Some(config) = edit.config {
            fields.push(SourceField::Config(config));
        }
        if let Some(active) = edit.active {
            fields.push(SourceField::Active(active));
        }
        let frequency_changed = edit
            .frequency
            .as_ref()
            .is_some_and(|f| *f != source.frequency);
        if let Some(frequency) = edit.frequency {
            fields.push(SourceField::Frequency(frequency));
        }

        let mut updated = source;
        for field in fields {
            updated = self.store.update_field(&updated.id, field).await?;
        }

        if frequency_changed && updated.validation.state == ValidationState::Accepted {
            updated = self.apply_frequency(updated).await?;
        }

        self.signals.publish(HarvestEvent::SourceUpdated {
            source: SourceRef::from(&updated),
        });
        Ok(updated)
    }

    /// Soft-delete and unschedule. Deleting twice is a no-op.
    pub async fn delete_source(&self, ident: &str) -> Result<Source> {
        let source = self.get_source(ident).await?;
        if source.is_deleted() {
            log::debug!("Source {} is already deleted", source.slug);
            return Ok(source);
        }

        let source = self.clear_schedule(source).await?;
        let source = self
            .store
            .update_field(&source.id, SourceField::Deleted(Some(Utc::now())))
            .await?;

        log::info!("Deleted source {}", source.slug);
        self.signals.publish(HarvestEvent::SourceDeleted {
            source: SourceRef::from(&source),
        });
        Ok(source)
    }

    /// Hard-remove every soft-deleted source. Returns how many were removed.
    pub async fn purge_sources(&self) -> Result<usize> {
        let query = SourceQuery {
            include_deleted: true,
            ..SourceQuery::default()
        };
        let mut purged = 0;
        for source in self.store.list(&query).await?.into_iter().filter(Source::is_deleted) {
            self.scheduler.unschedule(&source).await?;
            if self.store.remove(&source.id).await? {
                log::info!("Purged source {}", source.slug);
                purged += 1;
            }
        }
        Ok(purged)
    }

    // --- Validation workflow ---

    /// Accept a source and schedule it according to its frequency.
    pub async fn validate_source(
        &self,
        ident: &str,
        by: Option<String>,
        comment: Option<String>,
    ) -> Result<Source> {
        let source = self.get_live_source(ident).await?;
        let validation = Validation {
            state: ValidationState::Accepted,
            by,
            on: Some(Utc::now()),
            comment,
        };
        let source = self
            .store
            .update_field(&source.id, SourceField::Validation(validation))
            .await?;
        let source = if source.frequency.is_manual() {
            source
        } else {
            self.apply_frequency(source).await?
        };

        log::info!("Source {} accepted", source.slug);
        self.signals.publish(HarvestEvent::SourceValidated {
            source: SourceRef::from(&source),
        });
        Ok(source)
    }

    /// Refuse a source and drop its schedule.
    pub async fn reject_source(
        &self,
        ident: &str,
        by: Option<String>,
        comment: Option<String>,
    ) -> Result<Source> {
        let source = self.get_live_source(ident).await?;
        let validation = Validation {
            state: ValidationState::Refused,
            by,
            on: Some(Utc::now()),
            comment,
        };
        let source = self
            .store
            .update_field(&source.id, SourceField::Validation(validation))
            .await?;
        let source = self.clear_schedule(source).await?;

        log::info!("Source {} refused", source.slug);
        self.signals.publish(HarvestEvent::SourceRefused {
            source: SourceRef::from(&source),
        });
        Ok(source)
    }

    // --- Runs ---

    /// Harvest now. `debug` validates mapped datasets without writing them.
    pub async fn run(&self, ident: &str, debug: bool) -> Result<Job> {
        let source = self.get_live_source(ident).await?;
        let mode = if debug { RunMode::DryRun } else { RunMode::Persist };
        self.harvester.harvest(&source.id, mode).await
    }

    /// Dry run capped to a few items, leaving no trace.
    pub async fn preview(&self, ident: &str) -> Result<Job> {
        let source = self.get_live_source(ident).await?;
        self.harvester.harvest(&source.id, RunMode::Preview).await
    }

    /// Queue a run for the worker and return immediately.
    pub async fn launch(&self, ident: &str) -> Result<()> {
        let source = self.get_live_source(ident).await?;
        self.registry().get(&source.backend)?;
        self.scheduler.launch(&source).await
    }

    /// Run fired by a periodic task.
    ///
    /// Sources that are deleted, inactive or not accepted are skipped and
    /// yield `None`.
    pub async fn run_periodic(&self, task: &PeriodicTask) -> Result<Option<Job>> {
        let Some(source) = self.store.get(&task.source_id).await? else {
            log::warn!("Periodic task {} points to a missing source", task.name);
            return Ok(None);
        };
        if source.is_deleted()
            || !source.active
            || source.validation.state != ValidationState::Accepted
        {
            log::info!("Skipping periodic harvest of {}", source.slug);
            return Ok(None);
        }

        let mut recorded = source.periodic_task.clone().unwrap_or_else(|| task.clone());
        recorded.last_run_at = task.last_run_at;
        recorded.total_run_count = recorded.total_run_count.max(task.total_run_count);
        self.store
            .update_field(&source.id, SourceField::PeriodicTask(Some(recorded)))
            .await?;

        self.harvester
            .harvest(&source.id, RunMode::Persist)
            .await
            .map(Some)
    }

    // --- Scheduling ---

    /// Schedule periodic harvests from a crontab, interval or `@daily` style
    /// expression.
    pub async fn schedule(&self, ident: &str, expr: &str) -> Result<PeriodicTask> {
        let trigger: Trigger = expr.parse()?;
        let source = self.get_live_source(ident).await?;
        let task = self.scheduler.schedule(&source, trigger).await?;
        self.store
            .update_field(&source.id, SourceField::PeriodicTask(Some(task.clone())))
            .await?;

        self.signals.publish(HarvestEvent::SourceScheduled {
            source: SourceRef::from(&source),
            trigger: task.trigger.to_string(),
        });
        Ok(task)
    }

    /// Remove the periodic task. Fails if the source is not scheduled.
    pub async fn unschedule(&self, ident: &str) -> Result<Source> {
        let source = self.get_source(ident).await?;
        if !source.is_scheduled() {
            return Err(AppError::not_found(format!(
                "schedule of source '{}'",
                source.slug
            )));
        }
        self.clear_schedule(source).await
    }

    /// Pause or resume the periodic task, keeping its trigger.
    pub async fn enable_schedule(&self, ident: &str, enabled: bool) -> Result<PeriodicTask> {
        let source = self.get_live_source(ident).await?;
        let task = self.scheduler.set_enabled(&source, enabled).await?;
        self.store
            .update_field(&source.id, SourceField::PeriodicTask(Some(task.clone())))
            .await?;
        Ok(task)
    }

    /// Register the persisted schedules of every live source with the queue.
    pub async fn restore_schedules(&self) -> Result<usize> {
        let sources = self
            .store
            .list(&SourceQuery {
                scheduled_only: true,
                ..SourceQuery::default()
            })
            .await?;
        self.scheduler.restore(&sources).await
    }

    /// Schedule after the frequency, or unschedule a manual source.
    async fn apply_frequency(&self, source: Source) -> Result<Source> {
        match source.frequency.trigger() {
            Some(trigger) => {
                let task = self.scheduler.schedule(&source, trigger).await?;
                let source = self
                    .store
                    .update_field(&source.id, SourceField::PeriodicTask(Some(task)))
                    .await?;
                if let Some(task) = &source.periodic_task {
                    self.signals.publish(HarvestEvent::SourceScheduled {
                        source: SourceRef::from(&source),
                        trigger: task.trigger.to_string(),
                    });
                }
                Ok(source)
            }
            None => self.clear_schedule(source).await,
        }
    }

    /// Drop the periodic task if there is one.
    async fn clear_schedule(&self, source: Source) -> Result<Source> {
        if !source.is_scheduled() {
            return Ok(source);
        }
        self.scheduler.unschedule(&source).await?;
        let source = self
            .store
            .update_field(&source.id, SourceField::PeriodicTask(None))
            .await?;
        self.signals.publish(HarvestEvent::SourceUnscheduled {
            source: SourceRef::from(&source),
        });
        Ok(source)
    }

    // --- Inspection ---

    pub fn list_backends(&self) -> Vec<BackendInfo> {
        self.registry().list()
    }

    /// Page of jobs, newest first. Pages start at 1.
    pub async fn list_jobs(&self, ident: &str, page: usize) -> Result<JobPage> {
        let source = self.get_source(ident).await?;
        let page = page.max(1);
        let page_size = self.harvester.config().jobs_page_size.max(1);
        let total = source.jobs.len();
        let jobs = source
            .jobs
            .into_iter()
            .rev()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        Ok(JobPage {
            page,
            page_size,
            total,
            jobs,
        })
    }

    pub async fn get_job(&self, ident: &str, job_id: &str) -> Result<Job> {
        let source = self.get_source(ident).await?;
        source
            .job(job_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("job {job_id} of source '{}'", source.slug)))
    }

    fn check_backend(&self, backend: &str, config: &SourceConfig, errors: &mut Vec<FieldError>) {
        match self.registry().get(backend) {
            Ok(registered) => {
                if let Err(config_errors) = registered.info().validate_config(config) {
                    errors.extend(config_errors);
                }
            }
            Err(_) => errors.push(FieldError::new(
                "backend",
                format!("unknown backend '{backend}'"),
            )),
        }
    }
}

fn check_name(name: &str, errors: &mut Vec<FieldError>) {
    if name.trim().is_empty() {
        errors.push(FieldError::new("name", "must not be empty"));
    }
}

fn check_url(url: &str, errors: &mut Vec<FieldError>) {
    if !is_absolute_url(url.trim()) {
        errors.push(FieldError::new("url", "must be an absolute http(s) URL"));
    }
}
