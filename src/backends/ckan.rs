// src/backends/ckan.rs

//! CKAN action API backend.
//!
//! Discovery uses `package_list`, or a paged `package_search` with a filter
//! query when the source configures filters. Each item is then fetched with
//! `package_show`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{DiscoveryError, ItemError};
use crate::models::{Dataset, FilterMode, Item, Resource, Source};
use crate::utils::http::{FetchError, get_json};
use crate::utils::join_path;

use super::{Backend, BackendInfo, FilterType, HarvestContext, RemoteItem};

/// Page size used with `package_search`.
const SEARCH_ROWS: usize = 1000;

/// Backend for CKAN portals.
pub struct CkanBackend {
    info: BackendInfo,
}

impl CkanBackend {
    pub fn new() -> Self {
        Self {
            info: BackendInfo::new("ckan", "CKAN")
                .filter("organization", "Organization", FilterType::String)
                .filter("tags", "Tag", FilterType::String)
                .filter("res_format", "Resource format", FilterType::String)
                .filter("license_id", "License", FilterType::String),
        }
    }

    fn action_url(source: &Source, action: &str) -> String {
        join_path(&source.url, &format!("api/3/action/{action}"))
    }

    /// Solr filter query built from the source filters, if any.
    fn filter_query(source: &Source) -> Option<String> {
        let clauses: Vec<String> = source
            .config
            .filters
            .iter()
            .filter_map(|f| {
                let value = f.value.as_str()?;
                let sign = match f.mode {
                    FilterMode::Include => '+',
                    FilterMode::Exclude => '-',
                };
                Some(format!("{sign}{}:\"{}\"", f.key, value.replace('"', "\\\"")))
            })
            .collect();
        (!clauses.is_empty()).then(|| clauses.join(" "))
    }

    async fn call<T: DeserializeOwned>(
        client: &reqwest::Client,
        url: &str,
    ) -> Result<T, CallError> {
        let response: CkanResponse<T> = get_json(client, url).await.map_err(CallError::Fetch)?;
        response.into_result().map_err(CallError::Api)
    }

    async fn search_ids(
        &self,
        ctx: &HarvestContext<'_>,
        fq: &str,
    ) -> Result<Vec<RemoteItem>, DiscoveryError> {
        let base = Self::action_url(ctx.source, "package_search");
        let mut items = Vec::new();
        let mut start = 0;
        loop {
            let url = Url::parse_with_params(
                &base,
                [
                    ("fq", fq.to_string()),
                    ("rows", SEARCH_ROWS.to_string()),
                    ("start", start.to_string()),
                ],
            )?;
            let page: SearchResult = Self::call(ctx.client, url.as_str()).await?;
            let fetched = page.results.len();
            items.extend(page.results.into_iter().map(|hit| RemoteItem::new(hit.id)));
            start += fetched;
            log::debug!("CKAN search {}: {}/{} ids", ctx.source.slug, start, page.count);
            if fetched == 0 || start >= page.count {
                break;
            }
        }
        Ok(items)
    }
}

impl Default for CkanBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for CkanBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    async fn initialize(&self, ctx: &HarvestContext<'_>) -> Result<Vec<RemoteItem>, DiscoveryError> {
        if let Some(fq) = Self::filter_query(ctx.source) {
            return self.search_ids(ctx, &fq).await;
        }
        let url = Self::action_url(ctx.source, "package_list");
        let ids: Vec<String> = Self::call(ctx.client, &url).await?;
        Ok(ids.into_iter().map(RemoteItem::new).collect())
    }

    async fn process(&self, ctx: &HarvestContext<'_>, item: &Item) -> Result<Dataset, ItemError> {
        let url = Url::parse_with_params(
            &Self::action_url(ctx.source, "package_show"),
            [("id", item.remote_id.as_str())],
        )?;
        let package: CkanPackage = Self::call(ctx.client, url.as_str()).await?;
        if let Some(state) = package.state.as_deref() {
            if state != "active" {
                return Err(ItemError::new(format!(
                    "Dataset {} is {state}",
                    package.name
                )));
            }
        }
        Ok(package.into_dataset(&ctx.source.url))
    }
}

/// Failure of a CKAN action call.
enum CallError {
    Fetch(FetchError),
    Api(String),
}

impl From<CallError> for DiscoveryError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Fetch(e) => e.into(),
            CallError::Api(message) => DiscoveryError::new(format!("CKAN error: {message}")),
        }
    }
}

impl From<CallError> for ItemError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Fetch(e) => e.into(),
            CallError::Api(message) => ItemError::new(format!("CKAN error: {message}")),
        }
    }
}

// --- CKAN wire format ---

#[derive(Debug, Deserialize)]
struct CkanResponse<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<CkanApiError>,
}

impl<T> CkanResponse<T> {
    fn into_result(self) -> Result<T, String> {
        match (self.success, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err("response has no result".into()),
            (false, _) => Err(self
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "request was not successful".into())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CkanApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "__type")]
    kind: Option<String>,
}

impl std::fmt::Display for CkanApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.message) {
            (Some(kind), Some(message)) => write!(f, "{kind}: {message}"),
            (Some(kind), None) => f.write_str(kind),
            (None, Some(message)) => f.write_str(message),
            (None, None) => f.write_str("unknown error"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    count: usize,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CkanPackage {
    id: String,
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    license_id: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    metadata_modified: Option<String>,
    #[serde(default)]
    tags: Vec<CkanTag>,
    #[serde(default)]
    resources: Vec<CkanResource>,
    #[serde(default)]
    extras: Vec<CkanExtra>,
}

#[derive(Debug, Deserialize)]
struct CkanTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CkanResource {
    #[serde(default)]
    name: Option<String>,
    url: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CkanExtra {
    key: String,
    value: serde_json::Value,
}

impl CkanPackage {
    fn into_dataset(self, portal_url: &str) -> Dataset {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.name.clone());
        let extras: BTreeMap<String, serde_json::Value> =
            self.extras.into_iter().map(|e| (e.key, e.value)).collect();

        Dataset {
            remote_id: self.id,
            title,
            description: self.notes.unwrap_or_default(),
            tags: self.tags.into_iter().map(|t| t.name).collect(),
            license: self.license_id.filter(|l| !l.is_empty()),
            url: Some(join_path(portal_url, &format!("dataset/{}", self.name))),
            resources: self
                .resources
                .into_iter()
                .map(|r| Resource {
                    title: r
                        .name
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| r.url.clone()),
                    url: r.url,
                    format: r.format.filter(|f| !f.is_empty()).map(|f| f.to_lowercase()),
                    description: r.description.filter(|d| !d.is_empty()),
                })
                .collect(),
            extras,
            modified: self.metadata_modified.as_deref().and_then(parse_ckan_date),
        }
    }
}

/// CKAN timestamps are ISO 8601 without a timezone and are UTC.
fn parse_ckan_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|d| d.and_utc())
        })
}
