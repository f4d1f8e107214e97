//! Task queue abstraction and the in-process implementation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::error::{AppError, Result};
use crate::models::PeriodicTask;

/// A run requested for immediate execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRun {
    pub source_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedRun {
    pub fn now(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Queue of immediate runs plus a table of periodic tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Request a run as soon as a worker is free.
    async fn enqueue(&self, run: QueuedRun) -> Result<()>;

    /// Add or replace a periodic task, keyed by its name.
    async fn register(&self, task: PeriodicTask) -> Result<()>;

    /// Toggle a periodic task without forgetting it.
    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()>;

    /// Forget a periodic task. Returns whether it existed.
    async fn remove(&self, name: &str) -> Result<bool>;

    /// Pop the oldest pending run.
    async fn next_pending(&self) -> Result<Option<QueuedRun>>;

    /// Enabled tasks due at `now`, marked as run.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<PeriodicTask>>;

    /// Resolve once something was enqueued.
    async fn wait(&self);
}

/// Task queue living in the current process.
#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<QueuedRun>>,
    periodic: Mutex<BTreeMap<String, PeriodicTask>>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Registered periodic task, if any.
    pub fn task(&self, name: &str) -> Option<PeriodicTask> {
        self.periodic.lock().ok()?.get(name).cloned()
    }
}

fn poisoned<T>(_: T) -> AppError {
    AppError::queue("queue lock poisoned")
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, run: QueuedRun) -> Result<()> {
        self.pending.lock().map_err(poisoned)?.push_back(run);
        self.notify.notify_one();
        Ok(())
    }

    async fn register(&self, task: PeriodicTask) -> Result<()> {
        log::debug!("Registering periodic task {} ({})", task.name, task.trigger);
        self.periodic
            .lock()
            .map_err(poisoned)?
            .insert(task.name.clone(), task);
        Ok(())
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut periodic = self.periodic.lock().map_err(poisoned)?;
        let task = periodic
            .get_mut(name)
            .ok_or_else(|| AppError::not_found(format!("periodic task {name}")))?;
        task.enabled = enabled;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.periodic.lock().map_err(poisoned)?.remove(name).is_some())
    }

    async fn next_pending(&self) -> Result<Option<QueuedRun>> {
        Ok(self.pending.lock().map_err(poisoned)?.pop_front())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<PeriodicTask>> {
        let mut periodic = self.periodic.lock().map_err(poisoned)?;
        let mut due = Vec::new();
        for task in periodic.values_mut().filter(|t| t.is_due(now)) {
            task.mark_run(now);
            due.push(task.clone());
        }
        Ok(due)
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Interval, Period, Trigger, task_name};
    use chrono::Duration;

    fn task(source_id: &str, created: DateTime<Utc>) -> PeriodicTask {
        PeriodicTask::harvest(source_id, "1h".parse::<Trigger>().unwrap(), created)
    }

    #[tokio::test]
    async fn pending_runs_are_fifo() {
        let queue = InMemoryQueue::new();
        queue.enqueue(QueuedRun::now("a")).await.unwrap();
        queue.enqueue(QueuedRun::now("b")).await.unwrap();

        // The stored permit resolves immediately.
        queue.wait().await;
        assert_eq!(queue.next_pending().await.unwrap().unwrap().source_id, "a");
        assert_eq!(queue.next_pending().await.unwrap().unwrap().source_id, "b");
        assert!(queue.next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn due_tasks_fire_once_per_period() {
        let queue = InMemoryQueue::new();
        let created = Utc::now() - Duration::minutes(90);
        let registered = task("a", created);
        queue.register(registered.clone()).await.unwrap();

        let now = Utc::now();
        let due = queue.due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].total_run_count, 1);
        assert!(queue.due(now).await.unwrap().is_empty());

        let later = now + Duration::hours(1);
        assert_eq!(queue.due(later).await.unwrap().len(), 1);
        assert_eq!(queue.task(&registered.name).unwrap().total_run_count, 2);
    }

    #[tokio::test]
    async fn disabled_tasks_are_kept_but_skipped() {
        let queue = InMemoryQueue::new();
        let registered = task("a", Utc::now() - Duration::hours(2));
        queue.register(registered.clone()).await.unwrap();

        queue.set_enabled(&registered.name, false).await.unwrap();
        assert!(queue.due(Utc::now()).await.unwrap().is_empty());

        queue.set_enabled(&registered.name, true).await.unwrap();
        let task = queue.task(&registered.name).unwrap();
        assert_eq!(task.trigger, registered.trigger);
        assert_eq!(queue.due(Utc::now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_interval_does_not_stall_the_queue() {
        let queue = InMemoryQueue::new();
        let created = Utc::now() - Duration::hours(2);
        let huge = Trigger::Interval(Interval::new(u32::MAX, Period::Days));
        queue
            .register(PeriodicTask::harvest("far", huge, created))
            .await
            .unwrap();
        queue.register(task("near", created)).await.unwrap();

        let due = queue.due(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].source_id, "near");

        queue.register(task("other", created)).await.unwrap();
        assert!(queue.remove(&task_name("far")).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_task_cannot_be_toggled() {
        let queue = InMemoryQueue::new();
        assert!(matches!(
            queue.set_enabled("harvest:nope", true).await,
            Err(AppError::NotFound(_))
        ));
        assert!(!queue.remove("harvest:nope").await.unwrap());
    }
}
