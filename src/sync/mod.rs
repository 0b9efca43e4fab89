//! Data-freshness coordination
//!
//! A successful write in one place refreshes every mounted view of the
//! same collection, with no central store:
//!
//! ```text
//! mutate ─▶ backend ack ─▶ bus.publish(key) ─▶ view debounce ─▶ fetch ─▶ snapshot
//! ```
//!
//! Components, leaf first:
//!
//! - [`SnapshotFetcher`]: one endpoint read into a typed [`Snapshot`]
//! - [`MutationDispatcher`]: write, then announce the affected collections
//! - [`InvalidationBus`]: process-wide publish/subscribe keyed by collection
//! - [`RefreshCoordinator`]: per-view subscribe, debounce, re-fetch
//! - [`StaleDataGuard`]: one direct re-fetch if a view is still empty
//!   after its grace period

mod backend;
mod bus;
mod coordinator;
mod counters;
mod dispatcher;
mod errors;
mod event;
mod facade;
mod fetcher;
mod guard;
mod routes;

pub use backend::{Backend, HttpBackend, Method, Mutation};
pub use bus::{ChangeBus, Handler, InvalidationBus, PublishReport, SubscriptionHandle};
pub use coordinator::{CoordinatorConfig, CoordinatorState, RefreshCoordinator, DEFAULT_DEBOUNCE};
pub use counters::{
    stats_fetcher, stats_guard, zero_counters_policy, DashboardCounters, STATS_ENDPOINT,
};
pub use dispatcher::{MutationDispatcher, RetryPolicy};
pub use errors::{SyncError, SyncResult};
pub use event::{ChangeCause, ChangeEvent, CollectionKey};
pub use facade::{DataSync, SyncedView, ViewSpec};
pub use fetcher::{normalize_envelope, Record, ResponseShape, Snapshot, SnapshotFetcher};
pub use guard::{GuardDecision, GuardState, StaleDataGuard, StalePolicy};
pub use routes::ResourceRoutes;
