//! # DataSync
//!
//! The surface views and actions use:
//!
//! - [`DataSync::use_global_data_sync`] mounts a view
//! - [`DataSync::mutate`] writes and announces
//! - [`DataSync::trigger_data_mutation`] announces a change made elsewhere
//! - [`DataSync::refresh_all`] refreshes every mounted view

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::backend::{Backend, HttpBackend, Mutation};
use super::bus::{ChangeBus, InvalidationBus, PublishReport};
use super::coordinator::{CoordinatorConfig, RefreshCoordinator};
use super::dispatcher::{MutationDispatcher, RetryPolicy};
use super::errors::SyncResult;
use super::event::{ChangeCause, CollectionKey};
use super::fetcher::{Record, ResponseShape, SnapshotFetcher};
use super::guard::{StaleDataGuard, StalePolicy};
use super::routes::ResourceRoutes;
use crate::config::SyncConfig;

/// A mounted view
pub type SyncedView<T> = RefreshCoordinator<T>;

/// What a view reads and which changes refresh it
pub struct ViewSpec<T> {
    name: String,
    endpoint: String,
    shape: ResponseShape,
    collections: Vec<CollectionKey>,
    stale_policy: Option<StalePolicy<T>>,
    debounce: Option<Duration>,
    initial_fetch: bool,
}

impl<T> ViewSpec<T> {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            shape: ResponseShape::default(),
            collections: Vec::new(),
            stale_policy: None,
            debounce: None,
            initial_fetch: true,
        }
    }

    /// Subscribe to one more collection
    pub fn collection(mut self, key: CollectionKey) -> Self {
        self.collections.push(key);
        self
    }

    pub fn collections(mut self, keys: impl IntoIterator<Item = CollectionKey>) -> Self {
        self.collections.extend(keys);
        self
    }

    pub fn shape(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }

    /// Arm a stale-data guard with this baseline
    pub fn stale_guard(mut self, policy: StalePolicy<T>) -> Self {
        self.stale_policy = Some(policy);
        self
    }

    /// Override the debounce window of this view
    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    /// Skip the fetch on mount; the view loads on the first change
    pub fn lazy(mut self) -> Self {
        self.initial_fetch = false;
        self
    }
}

/// Shared handle over one bus, one backend and one dispatcher
#[derive(Clone)]
pub struct DataSync {
    bus: Arc<dyn ChangeBus>,
    backend: Arc<dyn Backend>,
    dispatcher: Arc<MutationDispatcher>,
    debounce: Duration,
    stale_grace: Duration,
}

impl DataSync {
    /// Private bus; nothing outside this handle sees its events
    pub fn new(backend: Arc<dyn Backend>, routes: ResourceRoutes) -> Self {
        Self::with_bus(backend, Arc::new(InvalidationBus::new()), routes)
    }

    /// On the process-wide bus
    pub fn global(backend: Arc<dyn Backend>, routes: ResourceRoutes) -> Self {
        Self::with_bus(backend, InvalidationBus::global(), routes)
    }

    pub fn with_bus(backend: Arc<dyn Backend>, bus: Arc<dyn ChangeBus>, routes: ResourceRoutes) -> Self {
        let dispatcher = MutationDispatcher::new(Arc::clone(&backend), Arc::clone(&bus), routes);
        Self {
            bus,
            backend,
            dispatcher: Arc::new(dispatcher),
            debounce: super::coordinator::DEFAULT_DEBOUNCE,
            stale_grace: Duration::from_millis(2000),
        }
    }

    /// HTTP backend on the process-wide bus, timings and routes from config
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        config.require_backend()?;

        let mut backend = HttpBackend::new(&config.base_url, config.request_timeout())?;
        if let Some(token) = &config.auth_token {
            backend = backend.with_auth_token(token.clone());
        }

        Ok(Self::global(Arc::new(backend), config.resource_routes())
            .with_retry(config.retry_policy())
            .with_timing(config.debounce(), config.stale_grace()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        let dispatcher = MutationDispatcher::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.bus),
            self.dispatcher.routes().clone(),
        )
        .with_retry(retry);
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    /// Default debounce window and stale grace period of mounted views
    pub fn with_timing(mut self, debounce: Duration, stale_grace: Duration) -> Self {
        self.debounce = debounce;
        self.stale_grace = stale_grace;
        self
    }

    pub fn bus(&self) -> &Arc<dyn ChangeBus> {
        &self.bus
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn routes(&self) -> &ResourceRoutes {
        self.dispatcher.routes()
    }

    /// Mount a view that stays fresh until dropped or unmounted
    ///
    /// Fails outside a tokio runtime.
    pub fn use_global_data_sync<T: Record>(
        &self,
        spec: ViewSpec<T>,
    ) -> SyncResult<SyncedView<T>> {
        let fetcher = Arc::new(SnapshotFetcher::new(
            Arc::clone(&self.backend),
            spec.endpoint,
            spec.shape,
        ));
        let guard = spec
            .stale_policy
            .map(|policy| StaleDataGuard::new(self.stale_grace, policy));
        let config = CoordinatorConfig {
            debounce: spec.debounce.unwrap_or(self.debounce),
            initial_fetch: spec.initial_fetch,
        };

        RefreshCoordinator::mount(
            spec.name,
            Arc::clone(&self.bus),
            fetcher,
            spec.collections,
            config,
            guard,
        )
    }

    /// Write, then announce the affected collections
    pub async fn mutate(&self, mutation: &Mutation) -> SyncResult<Value> {
        self.dispatcher.mutate(mutation).await
    }

    /// Announce that `collection` changed through some other path
    pub fn trigger_data_mutation(&self, collection: &CollectionKey) -> PublishReport {
        self.bus.publish(collection, ChangeCause::Refresh)
    }

    /// Refresh every mounted view now
    pub fn refresh_all(&self) -> PublishReport {
        self.bus.publish(&CollectionKey::ALL, ChangeCause::Refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::errors::SyncError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl Backend for Echo {
        async fn read(&self, _endpoint: &str) -> SyncResult<Value> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"data": [1, 2]}))
        }

        async fn write(&self, _mutation: &Mutation) -> SyncResult<Value> {
            Ok(json!({"ok": true}))
        }
    }

    fn sync() -> (Arc<Echo>, DataSync) {
        let backend = Arc::new(Echo {
            reads: AtomicUsize::new(0),
        });
        let sync = DataSync::new(
            Arc::clone(&backend) as Arc<dyn Backend>,
            ResourceRoutes::default(),
        );
        (backend, sync)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_and_mutate() {
        let (backend, sync) = sync();
        let mut view = sync.use_global_data_sync::<u32>(
            ViewSpec::new("users", "/api/usuarios").collection(CollectionKey::USERS),
        )
        .unwrap();

        assert_eq!(view.changed().await.unwrap().data, vec![1, 2]);
        sync.mutate(&Mutation::delete("/usuarios/1")).await.unwrap();

        view.changed().await.unwrap();
        assert_eq!(backend.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mount_outside_runtime_fails() {
        let (backend, sync) = sync();
        let result = sync.use_global_data_sync::<u32>(
            ViewSpec::new("users", "/api/usuarios").collection(CollectionKey::USERS),
        );

        assert!(matches!(result, Err(SyncError::NoRuntime)));
        assert_eq!(sync.trigger_data_mutation(&CollectionKey::USERS).matched, 0);
        assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_and_refresh_all() {
        let (_backend, sync) = sync();
        let _users = sync.use_global_data_sync::<u32>(
            ViewSpec::new("users", "/api/usuarios").collection(CollectionKey::USERS),
        )
        .unwrap();
        let _classes = sync.use_global_data_sync::<u32>(
            ViewSpec::new("classes", "/api/turmas")
                .collection(CollectionKey::CLASSES)
                .lazy(),
        )
        .unwrap();

        assert_eq!(sync.trigger_data_mutation(&CollectionKey::USERS).delivered, 1);
        assert_eq!(sync.refresh_all().delivered, 2);
    }

    #[test]
    fn test_from_config_requires_base_url() {
        let result = DataSync::from_config(&SyncConfig::default());
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
