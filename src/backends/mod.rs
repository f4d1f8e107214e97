// src/backends/mod.rs

//! Catalog connectors.
//!
//! A backend knows how to talk to one family of remote catalogs. It exposes
//! two operations to the orchestrator:
//!
//! - [`Backend::initialize`] enumerates the remote record identifiers
//! - [`Backend::process`] fetches one record and maps it into a [`Dataset`]
//!
//! Backends never touch local state. What they return is recorded by the
//! orchestrator and written by the surrounding catalog.

mod ckan;
mod dummy;
mod registry;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{DiscoveryError, FieldError, ItemError};
use crate::models::{Dataset, Item, Source, SourceConfig};

pub use ckan::CkanBackend;
pub use dummy::DummyBackend;
pub use registry::{BackendRegistry, RegisteredBackend};

/// What a backend gets to work with for one run.
pub struct HarvestContext<'a> {
    pub source: &'a Source,
    /// Engine-configured client: user agent, timeout and TLS policy applied
    pub client: &'a reqwest::Client,
}

/// One identifier produced by discovery, with whatever the backend wants to
/// carry over to `process`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub remote_id: String,
    pub args: Vec<serde_json::Value>,
    pub kwargs: BTreeMap<String, serde_json::Value>,
}

impl RemoteItem {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

impl From<RemoteItem> for Item {
    fn from(remote: RemoteItem) -> Self {
        let mut item = Item::new(remote.remote_id);
        item.args = remote.args;
        item.kwargs = remote.kwargs;
        item
    }
}

/// Type of a filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    String,
    Integer,
    /// Non-negative integer
    Count,
    Boolean,
}

impl FilterType {
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        match self {
            FilterType::String => value.is_string(),
            FilterType::Integer => value.is_i64() || value.is_u64(),
            FilterType::Count => value.is_u64(),
            FilterType::Boolean => value.is_boolean(),
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterType::String => "string",
            FilterType::Integer => "integer",
            FilterType::Count => "non-negative integer",
            FilterType::Boolean => "boolean",
        })
    }
}

/// A filter understood by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSpec {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub value_type: FilterType,
}

/// An on/off feature understood by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureSpec {
    pub key: String,
    pub label: String,
    pub default: bool,
}

/// Declarative description of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    /// Registry key
    pub name: String,
    pub display_name: String,
    pub filters: Vec<FilterSpec>,
    pub features: Vec<FeatureSpec>,
    /// Per-backend TLS opt-out, only ever set through [`BackendInfo::insecure`]
    pub verify_ssl: bool,
}

impl BackendInfo {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            filters: Vec::new(),
            features: Vec::new(),
            verify_ssl: true,
        }
    }

    pub fn filter(mut self, key: &str, label: &str, value_type: FilterType) -> Self {
        self.filters.push(FilterSpec {
            key: key.into(),
            label: label.into(),
            value_type,
        });
        self
    }

    pub fn feature(mut self, key: &str, label: &str, default: bool) -> Self {
        self.features.push(FeatureSpec {
            key: key.into(),
            label: label.into(),
            default,
        });
        self
    }

    /// Skip TLS certificate verification for this backend only.
    pub fn insecure(mut self) -> Self {
        self.verify_ssl = false;
        self
    }

    /// Check a source config against the declared filters and features,
    /// reporting every offending key.
    pub fn validate_config(&self, config: &SourceConfig) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        for filter in &config.filters {
            let field = format!("config.filters.{}", filter.key);
            match self.filters.iter().find(|spec| spec.key == filter.key) {
                None => errors.push(FieldError::new(
                    field,
                    format!("unknown filter for backend '{}'", self.name),
                )),
                Some(spec) if !spec.value_type.accepts(&filter.value) => errors.push(
                    FieldError::new(field, format!("expected {} value", spec.value_type)),
                ),
                Some(_) => {}
            }
        }

        for key in config.features.keys() {
            if !self.features.iter().any(|spec| &spec.key == key) {
                errors.push(FieldError::new(
                    format!("config.features.{key}"),
                    format!("unknown feature for backend '{}'", self.name),
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Feature value for a source, falling back to the declared default.
    pub fn feature_enabled(&self, config: &SourceConfig, key: &str) -> bool {
        let default = self
            .features
            .iter()
            .find(|spec| spec.key == key)
            .map(|spec| spec.default)
            .unwrap_or(false);
        config.feature(key, default)
    }
}

/// Connector to one family of remote catalogs.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Declarative metadata, including the registry key.
    fn info(&self) -> &BackendInfo;

    /// Discover the identifiers of every remote record to harvest.
    async fn initialize(&self, ctx: &HarvestContext<'_>) -> Result<Vec<RemoteItem>, DiscoveryError>;

    /// Fetch one remote record and map it into a dataset.
    async fn process(&self, ctx: &HarvestContext<'_>, item: &Item) -> Result<Dataset, ItemError>;
}
