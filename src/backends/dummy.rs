//! Backend producing synthetic datasets without any network access.

use async_trait::async_trait;

use crate::error::{DiscoveryError, ItemError};
use crate::models::{Dataset, Item, Resource};

use super::{Backend, BackendInfo, FilterType, HarvestContext, RemoteItem};

const DEFAULT_COUNT: u64 = 3;

/// Generates `count` datasets, optionally failing every one of them.
pub struct DummyBackend {
    info: BackendInfo,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            info: BackendInfo::new("dummy", "Dummy")
                .filter("count", "Number of datasets", FilterType::Count)
                .feature("fail", "Fail every item", false),
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for DummyBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    async fn initialize(&self, ctx: &HarvestContext<'_>) -> Result<Vec<RemoteItem>, DiscoveryError> {
        let count = ctx
            .source
            .config
            .filters_for("count")
            .last()
            .and_then(|f| f.value.as_u64())
            .unwrap_or(DEFAULT_COUNT);
        Ok((0..count)
            .map(|i| RemoteItem::new(format!("dummy-{i}")).with_kwarg("index", i))
            .collect())
    }

    async fn process(&self, ctx: &HarvestContext<'_>, item: &Item) -> Result<Dataset, ItemError> {
        if self.info.feature_enabled(&ctx.source.config, "fail") {
            return Err(ItemError::new(format!("Dummy failure for {}", item.remote_id)));
        }
        Ok(Dataset {
            remote_id: item.remote_id.clone(),
            title: format!("Dummy dataset {}", item.remote_id),
            description: format!("Generated by source {}", ctx.source.slug),
            tags: vec!["dummy".into()],
            url: Some(format!("{}/{}", ctx.source.url.trim_end_matches('/'), item.remote_id)),
            resources: vec![Resource {
                title: "data".into(),
                url: format!(
                    "{}/{}/data.csv",
                    ctx.source.url.trim_end_matches('/'),
                    item.remote_id
                ),
                format: Some("csv".into()),
                description: None,
            }],
            ..Dataset::default()
        })
    }
}
