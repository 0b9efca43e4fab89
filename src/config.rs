//! Configuration file
//!
//! JSON, every field optional. Loaded once at start-up and validated
//! before anything is mounted.
//!
//! ```json
//! {
//!   "base_url": "http://localhost:3001",
//!   "debounce_ms": 300,
//!   "routes": { "matriculas": ["students", "classes"] },
//!   "views": [
//!     { "name": "users-table", "endpoint": "/api/usuarios", "collections": ["users"] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::Severity;
use crate::sync::{CollectionKey, ResourceRoutes, ResponseShape, RetryPolicy};
use crate::sync::{SyncError, SyncResult};

/// Which baseline a view's stale guard watches for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// No guard
    #[default]
    Off,
    /// Never populated
    Unpopulated,
    /// Never populated or zero items
    Empty,
}

/// One view mounted by the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    pub name: String,

    /// Read endpoint, e.g. `/api/escolas/gestor`
    pub endpoint: String,

    /// Collections whose changes refresh this view
    pub collections: Vec<CollectionKey>,

    #[serde(default)]
    pub shape: ResponseShape,

    #[serde(default)]
    pub guard: GuardMode,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Backend base URL; required by the CLI
    #[serde(default)]
    pub base_url: String,

    /// Opaque bearer token issued by the session layer
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_stale_grace_ms")]
    pub stale_grace_ms: u64,

    /// Extra attempts for idempotent writes that fail transiently
    #[serde(default = "default_mutation_retries")]
    pub mutation_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Resource segment → collections, merged over the built-in table
    #[serde(default)]
    pub routes: BTreeMap<String, Vec<CollectionKey>>,

    #[serde(default)]
    pub views: Vec<ViewConfig>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_stale_grace_ms() -> u64 {
    2_000
}
fn default_mutation_retries() -> u32 {
    1
}
fn default_retry_backoff_ms() -> u64 {
    200
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            debounce_ms: default_debounce_ms(),
            stale_grace_ms: default_stale_grace_ms(),
            mutation_retries: default_mutation_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            routes: BTreeMap::new(),
            views: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl SyncConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("failed to read config: {}", e)))?;

        let config: SyncConfig = serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.debounce_ms == 0 {
            return Err(SyncError::Config("debounce_ms must be > 0".into()));
        }

        if self.request_timeout_ms == 0 {
            return Err(SyncError::Config("request_timeout_ms must be > 0".into()));
        }

        if Severity::parse(&self.log_level).is_none() {
            return Err(SyncError::Config(format!(
                "invalid log_level: '{}'",
                self.log_level
            )));
        }

        for (resource, collections) in &self.routes {
            if resource.is_empty() || resource.contains('/') {
                return Err(SyncError::Config(format!(
                    "route '{}' must be a single path segment",
                    resource
                )));
            }
            if collections.is_empty() {
                return Err(SyncError::Config(format!(
                    "route '{}' has no collections",
                    resource
                )));
            }
            if collections.iter().any(CollectionKey::is_wildcard) {
                return Err(SyncError::Config(format!(
                    "route '{}' targets the wildcard key",
                    resource
                )));
            }
        }

        let mut names = std::collections::HashSet::new();
        for view in &self.views {
            if view.name.is_empty() || view.name == CollectionKey::ALL.as_str() {
                return Err(SyncError::Config(format!(
                    "invalid view name: '{}'",
                    view.name
                )));
            }
            if !names.insert(view.name.as_str()) {
                return Err(SyncError::Config(format!(
                    "duplicate view name: '{}'",
                    view.name
                )));
            }
            if view.endpoint.is_empty() {
                return Err(SyncError::Config(format!(
                    "view '{}' has no endpoint",
                    view.name
                )));
            }
            if view.collections.is_empty() {
                return Err(SyncError::Config(format!(
                    "view '{}' subscribes to no collection",
                    view.name
                )));
            }
        }

        Ok(())
    }

    /// Extra check for running against a live backend
    pub fn require_backend(&self) -> SyncResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url is required".into()));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_millis(self.stale_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.mutation_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::parse(&self.log_level).unwrap_or(Severity::Info)
    }

    /// Built-in routes with the configured ones laid over them
    pub fn resource_routes(&self) -> ResourceRoutes {
        let mut routes = ResourceRoutes::default();
        for (resource, collections) in &self.routes {
            routes.insert(resource.clone(), collections.clone());
        }
        routes
    }
}
