//! Name to backend mapping, filled once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::HttpConfig;
use crate::utils::http::create_client;

use super::{Backend, BackendInfo, CkanBackend, DummyBackend};

/// A backend together with the HTTP client built for it.
pub struct RegisteredBackend {
    backend: Box<dyn Backend>,
    client: reqwest::Client,
}

impl RegisteredBackend {
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn info(&self) -> &BackendInfo {
        self.backend.info()
    }
}

/// Registry of every known backend.
///
/// Registration takes `&mut self`; once the registry is shared behind an
/// `Arc` it can no longer change.
pub struct BackendRegistry {
    http: HttpConfig,
    backends: BTreeMap<String, Arc<RegisteredBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry whose clients follow `http`.
    pub fn new(http: HttpConfig) -> Self {
        Self {
            http,
            backends: BTreeMap::new(),
        }
    }

    /// Registry with the bundled `ckan` and `dummy` backends.
    pub fn with_defaults(http: HttpConfig) -> Result<Self> {
        let mut registry = Self::new(http);
        registry.register(CkanBackend::new())?;
        registry.register(DummyBackend::new())?;
        Ok(registry)
    }

    /// Add a backend under its declared name.
    pub fn register(&mut self, backend: impl Backend + 'static) -> Result<()> {
        let info = backend.info();
        let name = info.name.clone();
        if self.backends.contains_key(&name) {
            return Err(AppError::configuration(format!(
                "Backend '{name}' is already registered"
            )));
        }
        if !info.verify_ssl {
            log::warn!("Backend '{name}' opts out of TLS certificate verification");
        }
        let client = create_client(&self.http, info.verify_ssl)?;
        log::debug!("Registered backend '{name}'");
        self.backends.insert(
            name,
            Arc::new(RegisteredBackend {
                backend: Box::new(backend),
                client,
            }),
        );
        Ok(())
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Result<Arc<RegisteredBackend>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::configuration(format!("Unknown backend '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Descriptors of every backend, ordered by name.
    pub fn list(&self) -> Vec<BackendInfo> {
        self.backends.values().map(|b| b.info().clone()).collect()
    }
}
