//! Executes queued and periodic runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;

use crate::actions::HarvestActions;
use crate::error::{AppError, Result};
use crate::models::Job;

use super::queue::TaskQueue;

/// Polls a task queue and hands runs over to the actions.
///
/// Runs of one batch execute concurrently. Two runs of the same source in
/// one batch are resolved by the job guard: the second one is refused.
pub struct Worker {
    actions: Arc<HarvestActions>,
    queue: Arc<dyn TaskQueue>,
    tick: Duration,
}

impl Worker {
    pub fn new(actions: Arc<HarvestActions>, queue: Arc<dyn TaskQueue>, tick: Duration) -> Self {
        Self { actions, queue, tick }
    }

    /// Execute every pending run. Returns how many were attempted.
    pub async fn run_pending(&self) -> usize {
        let mut batch = Vec::new();
        loop {
            match self.queue.next_pending().await {
                Ok(Some(run)) => batch.push(run),
                Ok(None) => break,
                Err(e) => {
                    log::error!("Unable to read pending runs: {}", e);
                    break;
                }
            }
        }

        let results = join_all(batch.iter().map(|run| self.actions.run(&run.source_id, false))).await;
        for (run, result) in batch.iter().zip(results) {
            report(&run.source_id, result.map(Some));
        }
        batch.len()
    }

    /// Fire every periodic task due at `now`. Returns how many fired.
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        let due = match self.queue.due(now).await {
            Ok(due) => due,
            Err(e) => {
                log::error!("Unable to read periodic tasks: {}", e);
                return 0;
            }
        };

        let results = join_all(due.iter().map(|task| self.actions.run_periodic(task))).await;
        for (task, result) in due.iter().zip(results) {
            report(&task.source_id, result);
        }
        due.len()
    }

    /// Loop until `shutdown` resolves.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        log::info!("Worker started (tick every {}s)", self.tick.as_secs());
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.run_due(Utc::now()).await;
                    self.run_pending().await;
                }
                _ = self.queue.wait() => {
                    self.run_pending().await;
                }
            }
        }
        log::info!("Worker stopped");
    }
}

fn report(source_id: &str, result: Result<Option<Job>>) {
    match result {
        Ok(Some(job)) => log::info!(
            "Harvest of {} ended {} ({} items)",
            source_id,
            job.status.as_str(),
            job.items.len()
        ),
        Ok(None) => {}
        Err(AppError::AlreadyRunning { slug, job_id }) => {
            log::warn!("Skipped {}: job {} still running", slug, job_id)
        }
        Err(e) => log::error!("Harvest of {} failed: {}", source_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::NewSource;
    use crate::backends::BackendRegistry;
    use crate::models::{HttpConfig, JobStatus, RunConfig, Source};
    use crate::scheduler::InMemoryQueue;
    use crate::signals::Signals;
    use crate::storage::MemoryStore;

    async fn setup() -> (Worker, Arc<HarvestActions>, Source) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let registry = BackendRegistry::with_defaults(HttpConfig::default()).unwrap();
        let actions = Arc::new(HarvestActions::new(
            store.clone(),
            store,
            Arc::new(registry),
            queue.clone(),
            Signals::new(),
            RunConfig::default(),
        ));
        let source = actions
            .create_source(NewSource {
                name: "Demo".into(),
                url: "https://dev.local".into(),
                backend: "dummy".into(),
                ..NewSource::default()
            })
            .await
            .unwrap();
        let worker = Worker::new(actions.clone(), queue, Duration::from_secs(30));
        (worker, actions, source)
    }

    #[tokio::test]
    async fn drains_launched_runs() {
        let (worker, actions, source) = setup().await;
        actions.launch(&source.slug).await.unwrap();

        assert_eq!(worker.run_pending().await, 1);
        assert_eq!(worker.run_pending().await, 0);
        let stored = actions.get_source(&source.id).await.unwrap();
        assert_eq!(stored.jobs.len(), 1);
        assert_eq!(stored.jobs[0].status, JobStatus::Done);
    }

    #[tokio::test]
    async fn duplicate_launches_never_overlap() {
        let (worker, actions, source) = setup().await;
        actions.launch(&source.slug).await.unwrap();
        actions.launch(&source.slug).await.unwrap();

        assert_eq!(worker.run_pending().await, 2);
        let stored = actions.get_source(&source.id).await.unwrap();
        assert!(!stored.jobs.is_empty());
        assert!(stored.jobs.iter().all(|j| !j.is_running()));
    }

    #[tokio::test]
    async fn fires_due_tasks_for_accepted_sources() {
        let (worker, actions, source) = setup().await;
        actions.schedule(&source.slug, "1h").await.unwrap();
        actions.validate_source(&source.slug, None, None).await.unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(worker.run_due(later).await, 1);
        assert_eq!(worker.run_due(later).await, 0);

        let stored = actions.get_source(&source.id).await.unwrap();
        assert_eq!(stored.jobs.len(), 1);
        let task = stored.periodic_task.unwrap();
        assert_eq!(task.total_run_count, 1);
        assert_eq!(task.last_run_at, Some(later));
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (worker, actions, source) = setup().await;
        actions.launch(&source.slug).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = async {
            // First tick fires immediately and drains the queue.
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(());
        };
        tokio::join!(worker.run_until(async { let _ = rx.await; }), handle);

        let stored = actions.get_source(&source.id).await.unwrap();
        assert_eq!(stored.jobs.len(), 1);
    }
}
