//! Engine configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Outbound HTTP behavior shared by every backend
    #[serde(default)]
    pub http: HttpConfig,

    /// Orchestrator limits
    #[serde(default)]
    pub harvest: RunConfig,

    /// Periodic worker settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Local store location
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HarvestConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::configuration("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::configuration("http.timeout_secs must be > 0"));
        }
        if self.harvest.call_timeout_secs == 0 {
            return Err(AppError::configuration(
                "harvest.call_timeout_secs must be > 0",
            ));
        }
        if self.harvest.stale_job_after_secs == 0 {
            return Err(AppError::configuration(
                "harvest.stale_job_after_secs must be > 0",
            ));
        }
        if self.harvest.preview_max_items == 0 {
            return Err(AppError::configuration(
                "harvest.preview_max_items must be > 0",
            ));
        }
        if self.harvest.jobs_page_size == 0 {
            return Err(AppError::configuration("harvest.jobs_page_size must be > 0"));
        }
        if self.scheduler.tick_secs == 0 {
            return Err(AppError::configuration("scheduler.tick_secs must be > 0"));
        }
        Ok(())
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for every outbound request
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Verify TLS certificates of remote catalogs
    #[serde(default = "defaults::verify_ssl")]
    pub verify_ssl: bool,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            verify_ssl: defaults::verify_ssl(),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum number of items kept from discovery (unbounded if absent)
    #[serde(default)]
    pub max_items: Option<usize>,

    /// Items kept by a preview run
    #[serde(default = "defaults::preview_max_items")]
    pub preview_max_items: usize,

    /// Upper bound on a single backend `initialize`/`process` call
    #[serde(default = "defaults::call_timeout")]
    pub call_timeout_secs: u64,

    /// Non-terminal jobs older than this are considered abandoned
    #[serde(default = "defaults::stale_job_after")]
    pub stale_job_after_secs: u64,

    /// Jobs per page when listing history
    #[serde(default = "defaults::jobs_page_size")]
    pub jobs_page_size: usize,
}

impl RunConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        let secs = i64::try_from(self.stale_job_after_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_items: None,
            preview_max_items: defaults::preview_max_items(),
            call_timeout_secs: defaults::call_timeout(),
            stale_job_after_secs: defaults::stale_job_after(),
            jobs_page_size: defaults::jobs_page_size(),
        }
    }
}

/// Periodic worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the worker looks for due periodic tasks
    #[serde(default = "defaults::tick")]
    pub tick_secs: u64,
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: defaults::tick(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: defaults::storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // HTTP defaults
    pub fn user_agent() -> String {
        concat!(
            "catalog-harvester/",
            env!("CARGO_PKG_VERSION"),
            " (+dataset catalog harvester)"
        )
        .into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn verify_ssl() -> bool {
        true
    }

    // Harvest defaults
    pub fn preview_max_items() -> usize {
        10
    }
    pub fn call_timeout() -> u64 {
        300
    }
    pub fn stale_job_after() -> u64 {
        6 * 60 * 60
    }
    pub fn jobs_page_size() -> usize {
        10
    }

    // Scheduler defaults
    pub fn tick() -> u64 {
        30
    }

    pub fn storage_path() -> PathBuf {
        PathBuf::from("storage")
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
