//! Translation of source frequencies into task queue registrations.
//!
//! The [`Scheduler`] never runs anything itself: it registers periodic tasks
//! and immediate runs with a [`TaskQueue`], and the [`Worker`] executes them.

mod queue;
mod worker;

use std::sync::Arc;

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{PeriodicTask, Source, Trigger, task_name};

pub use queue::{InMemoryQueue, QueuedRun, TaskQueue};
pub use worker::Worker;

/// Adapter between sources and the task queue.
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<dyn TaskQueue>,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self { queue }
    }

    /// Register `trigger` for `source`, replacing any previous one.
    ///
    /// Rescheduling with the same trigger keeps the run history.
    pub async fn schedule(&self, source: &Source, trigger: Trigger) -> Result<PeriodicTask> {
        let task = match &source.periodic_task {
            Some(existing) if existing.trigger == trigger => PeriodicTask {
                enabled: true,
                ..existing.clone()
            },
            _ => PeriodicTask::harvest(&source.id, trigger, Utc::now()),
        };
        self.queue.register(task.clone()).await?;
        log::info!("Scheduled {} ({})", source.slug, task.trigger);
        Ok(task)
    }

    /// Remove the periodic task of `source`. Returns whether one existed.
    pub async fn unschedule(&self, source: &Source) -> Result<bool> {
        let removed = self.queue.remove(&task_name(&source.id)).await?;
        if removed {
            log::info!("Unscheduled {}", source.slug);
        }
        Ok(removed)
    }

    /// Toggle the periodic task of `source`, keeping its trigger.
    pub async fn set_enabled(&self, source: &Source, enabled: bool) -> Result<PeriodicTask> {
        let mut task = source
            .periodic_task
            .clone()
            .ok_or_else(|| AppError::not_found(format!("schedule of source {}", source.slug)))?;
        task.enabled = enabled;
        match self.queue.set_enabled(&task.name, enabled).await {
            Err(AppError::NotFound(_)) => self.queue.register(task.clone()).await?,
            other => other?,
        }
        Ok(task)
    }

    /// Enqueue an immediate run of `source`.
    pub async fn launch(&self, source: &Source) -> Result<()> {
        self.queue.enqueue(QueuedRun::now(&source.id)).await?;
        log::info!("Queued harvest of {}", source.slug);
        Ok(())
    }

    /// Register the persisted periodic task of every live source, as after a
    /// restart of the process owning the queue.
    pub async fn restore(&self, sources: &[Source]) -> Result<usize> {
        let mut restored = 0;
        for source in sources.iter().filter(|s| !s.is_deleted()) {
            if let Some(task) = &source.periodic_task {
                self.queue.register(task.clone()).await?;
                restored += 1;
            }
        }
        Ok(restored)
    }
}
