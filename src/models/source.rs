//! Harvest source: one configured connection to a remote catalog.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::job::{HarvestError, Job};
use super::schedule::{Frequency, PeriodicTask};

/// Who a source belongs to. A source has at most one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
    User(String),
    Organization(String),
}

impl Owner {
    /// Owner from separate user and organization ids, which are exclusive.
    pub fn from_parts(user: Option<String>, organization: Option<String>) -> Result<Option<Self>> {
        match (user, organization) {
            (Some(_), Some(_)) => Err(AppError::invalid(
                "owner",
                "a source belongs to a user or to an organization, not both",
            )),
            (Some(user), None) => Ok(Some(Owner::User(user))),
            (None, Some(org)) => Ok(Some(Owner::Organization(org))),
            (None, None) => Ok(None),
        }
    }
}

/// Moderation state of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    #[default]
    Pending,
    Accepted,
    Refused,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub state: ValidationState,
    /// Actor who accepted or refused the source
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Whether a filter keeps or drops matching records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
}

/// A configured filter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterValue {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default, rename = "type")]
    pub mode: FilterMode,
}

impl FilterValue {
    pub fn include(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            mode: FilterMode::Include,
        }
    }

    pub fn exclude(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            mode: FilterMode::Exclude,
        }
    }
}

/// Backend specific configuration of a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub filters: Vec<FilterValue>,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

impl SourceConfig {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.features.is_empty()
    }

    /// Values of every filter configured for `key`.
    pub fn filters_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a FilterValue> + 'a {
        self.filters.iter().filter(move |f| f.key == key)
    }

    pub fn feature(&self, key: &str, default: bool) -> bool {
        self.features.get(key).copied().unwrap_or(default)
    }
}

/// A configured remote catalog to harvest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    /// Derived from the name at creation, never changes afterwards
    pub slug: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    pub backend: String,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub config: SourceConfig,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validation: Validation,
    #[serde(default)]
    pub periodic_task: Option<PeriodicTask>,
    /// Execution history, oldest first
    #[serde(default)]
    pub jobs: Vec<Job>,
}

fn default_active() -> bool {
    true
}

/// Single-field update applied atomically by a store.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceField {
    Name(String),
    Url(String),
    Description(String),
    Frequency(Frequency),
    Config(SourceConfig),
    Active(bool),
    Deleted(Option<DateTime<Utc>>),
    Validation(Validation),
    PeriodicTask(Option<PeriodicTask>),
}

/// Outcome of the guarded job append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStart {
    Started,
    /// A fresh non-terminal job already exists
    Busy { job_id: String },
}

/// Outcome of overwriting an embedded job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSave {
    Saved,
    /// The stored job has ended and was left untouched
    Closed,
}

impl Source {
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn is_scheduled(&self) -> bool {
        self.periodic_task.is_some()
    }

    pub fn last_job(&self) -> Option<&Job> {
        self.jobs.last()
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn running_job(&self) -> Option<&Job> {
        self.jobs.iter().rev().find(|j| j.is_running())
    }

    pub fn apply(&mut self, field: SourceField) {
        match field {
            SourceField::Name(name) => self.name = name,
            SourceField::Url(url) => self.url = url,
            SourceField::Description(description) => self.description = description,
            SourceField::Frequency(frequency) => self.frequency = frequency,
            SourceField::Config(config) => self.config = config,
            SourceField::Active(active) => self.active = active,
            SourceField::Deleted(deleted) => self.deleted = deleted,
            SourceField::Validation(validation) => self.validation = validation,
            SourceField::PeriodicTask(task) => self.periodic_task = task,
        }
    }

    /// Append `job` unless a non-terminal job younger than `stale_after`
    /// exists. Older non-terminal jobs are closed as abandoned first.
    ///
    /// Stores call this while holding their write lock on the source.
    pub fn try_start_job(&mut self, job: Job, now: DateTime<Utc>, stale_after: Duration) -> JobStart {
        if let Some(fresh) = self
            .jobs
            .iter()
            .find(|j| j.is_running() && now - j.started < stale_after)
        {
            return JobStart::Busy {
                job_id: fresh.id.clone(),
            };
        }

        for stale in self.jobs.iter_mut().filter(|j| j.is_running()) {
            log::warn!(
                "Closing abandoned job {} of source {} (still {} since {})",
                stale.id,
                self.slug,
                stale.status.as_str(),
                stale.started
            );
            let message = format!(
                "Job abandoned: still {} after {} minutes",
                stale.status.as_str(),
                (now - stale.started).num_minutes()
            );
            stale.fail(now, HarvestError::new(message, None));
        }

        self.jobs.push(job);
        JobStart::Started
    }

    /// Replace the embedded job with the same id. Returns None if absent.
    ///
    /// A job that has ended is never overwritten.
    pub fn replace_job(&mut self, job: &Job) -> Option<JobSave> {
        let existing = self.jobs.iter_mut().find(|j| j.id == job.id)?;
        if existing.ended.is_some() {
            return Some(JobSave::Closed);
        }
        *existing = job.clone();
        Some(JobSave::Saved)
    }
}

/// Lightweight reference to a source carried by signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub slug: String,
    pub name: String,
}

impl From<&Source> for SourceRef {
    fn from(source: &Source) -> Self {
        Self {
            id: source.id.clone(),
            slug: source.slug.clone(),
            name: source.name.clone(),
        }
    }
}

/// Filter for listing sources. Deleted sources are excluded by default.
#[derive(Debug, Clone, Default)]
pub struct SourceQuery {
    pub owner: Option<String>,
    pub organization: Option<String>,
    pub include_deleted: bool,
    pub scheduled_only: bool,
}

impl SourceQuery {
    pub fn matches(&self, source: &Source) -> bool {
        if source.is_deleted() && !self.include_deleted {
            return false;
        }
        if self.scheduled_only && !source.is_scheduled() {
            return false;
        }
        if let Some(user) = &self.owner {
            if source.owner != Some(Owner::User(user.clone())) {
                return false;
            }
        }
        if let Some(org) = &self.organization {
            if source.owner != Some(Owner::Organization(org.clone())) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn source(slug: &str) -> Source {
        Source {
            id: format!("id-{slug}"),
            slug: slug.to_string(),
            name: slug.to_string(),
            url: "https://dev.local".to_string(),
            description: String::new(),
            backend: "dummy".to_string(),
            frequency: Frequency::Manual,
            owner: None,
            config: SourceConfig::default(),
            active: true,
            created_at: Utc::now(),
            deleted: None,
            validation: Validation::default(),
            periodic_task: None,
            jobs: Vec::new(),
        }
    }
}
