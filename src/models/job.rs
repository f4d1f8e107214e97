//! Harvest jobs, their items and recorded errors.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DiscoveryError, ItemError};

/// A recorded failure, attached to a job or to one of its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HarvestError {
    pub fn new(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            message: message.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

impl From<DiscoveryError> for HarvestError {
    fn from(e: DiscoveryError) -> Self {
        Self::new(e.message, e.details)
    }
}

impl From<ItemError> for HarvestError {
    fn from(e: ItemError) -> Self {
        Self::new(e.message, e.details)
    }
}

/// Status of a harvest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Initializing,
    Initialized,
    Failed,
    Done,
    DoneErrors,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Done | JobStatus::DoneErrors)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Initialized => "initialized",
            JobStatus::Failed => "failed",
            JobStatus::Done => "done",
            JobStatus::DoneErrors => "done-errors",
        }
    }
}

/// Status of a single harvested item. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Started,
    Done,
    Failed,
}

/// One remote record discovered by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Backend identifier, opaque to the engine
    pub remote_id: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
    /// Local id of the dataset written by the catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<HarvestError>,
}

impl Item {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            status: ItemStatus::Pending,
            started: None,
            ended: None,
            dataset_id: None,
            errors: Vec::new(),
        }
    }

    /// Move to `next` if it does not go backwards. Returns whether it moved.
    fn advance(&mut self, next: ItemStatus) -> bool {
        let finished = matches!(self.status, ItemStatus::Done | ItemStatus::Failed);
        if finished || next <= self.status {
            return false;
        }
        self.status = next;
        true
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        let moved = self.advance(ItemStatus::Started);
        if moved {
            self.started = Some(now);
        }
        moved
    }

    pub fn succeed(&mut self, now: DateTime<Utc>, dataset_id: Option<String>) -> bool {
        let moved = self.advance(ItemStatus::Done);
        if moved {
            self.dataset_id = dataset_id;
            self.ended = Some(now);
        }
        moved
    }

    /// Record a failure. Errors accumulate even if the status cannot move.
    pub fn fail(&mut self, now: DateTime<Utc>, error: HarvestError) -> bool {
        self.errors.push(error);
        let moved = self.advance(ItemStatus::Failed);
        if moved {
            self.ended = Some(now);
        }
        moved
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// One execution attempt of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub started: DateTime<Utc>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
    /// Mapped datasets were validated but not written
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub errors: Vec<HarvestError>,
}

impl Job {
    pub fn new(now: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Initializing,
            started: now,
            ended: None,
            dry_run,
            items: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Terminate the job as failed with a job-level error.
    pub fn fail(&mut self, now: DateTime<Utc>, error: HarvestError) {
        self.errors.push(error);
        self.status = JobStatus::Failed;
        self.ended = Some(now);
    }

    /// Write the terminal status once every item has been processed.
    ///
    /// A job already marked failed keeps its status.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Failed {
            return;
        }
        self.ended = Some(now);
        self.status = if self.items.iter().any(Item::has_errors) {
            JobStatus::DoneErrors
        } else {
            JobStatus::Done
        };
    }

    pub fn failed_items(&self) -> usize {
        self.items.iter().filter(|i| i.has_errors()).count()
    }
}
