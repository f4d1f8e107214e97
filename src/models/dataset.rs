//! Dataset data structure produced by backends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ItemError;

/// A downloadable distribution of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A remote record mapped into the shape the local catalog expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Identifier on the remote catalog
    pub remote_id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub license: Option<String>,

    /// Landing page on the remote catalog
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub resources: Vec<Resource>,

    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,

    /// Last modification on the remote side
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl Dataset {
    /// Check the mapped dataset without writing it anywhere.
    pub fn validate(&self) -> Result<(), ItemError> {
        let mut problems = Vec::new();
        if self.title.trim().is_empty() {
            problems.push("title is empty".to_string());
        }
        for resource in &self.resources {
            if url::Url::parse(&resource.url).is_err() {
                problems.push(format!("resource '{}' has invalid url '{}'", resource.title, resource.url));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ItemError::new(format!("Invalid dataset: {}", problems.join(", "))))
        }
    }
}
