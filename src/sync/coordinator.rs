//! # Refresh Coordinator
//!
//! Per-view state machine that keeps one snapshot fresh.
//!
//! ```text
//! Idle ─mount─▶ Subscribed ─event─▶ Debouncing ─window─▶ Fetching ─▶ Subscribed
//!                   ▲                   │  ▲ event (restart)      │
//!                   └───────────────────┴──┘                      │
//!                       refresh-all: fetch immediately ◀──────────┘
//! any state ─unmount─▶ Unmounted (absorbing)
//! ```
//!
//! Each view runs as one tokio task. Bus handlers only enqueue a signal,
//! so `publish` never blocks on a view. Fetches race the shutdown signal
//! and results pass through the status lock, so nothing is applied after
//! unmount.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use super::bus::{ChangeBus, Handler, SubscriptionHandle};
use super::errors::{SyncError, SyncResult};
use super::event::{ChangeEvent, CollectionKey};
use super::fetcher::{Record, Snapshot, SnapshotFetcher};
use super::guard::{GuardDecision, GuardState, StaleDataGuard};
use crate::observability::{log_event, Event, SyncMetrics};

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Lifecycle of one view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Subscribed,
    Debouncing,
    Fetching,
    Unmounted,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Subscribed => "subscribed",
            CoordinatorState::Debouncing => "debouncing",
            CoordinatorState::Fetching => "fetching",
            CoordinatorState::Unmounted => "unmounted",
        };
        f.write_str(name)
    }
}

/// Timing knobs of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Window collapsing bursts of change events into one fetch
    pub debounce: Duration,
    /// Load the snapshot as soon as the view mounts
    pub initial_fetch: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            initial_fetch: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Changed,
    RefreshAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Coalesced,
    Direct,
}

struct Inner<T: Record> {
    id: String,
    name: String,
    fetcher: Arc<SnapshotFetcher<T>>,
    bus: Arc<dyn ChangeBus>,
    handles: Mutex<Vec<SubscriptionHandle>>,
    /// Also the gate for applying snapshots: nothing is applied once Unmounted
    status: Mutex<CoordinatorState>,
    guard: Mutex<Option<StaleDataGuard<T>>>,
    snapshots: watch::Sender<Snapshot<T>>,
    signals: mpsc::UnboundedSender<Signal>,
    shutdown: watch::Sender<bool>,
}

impl<T: Record> Inner<T> {
    fn status(&self) -> MutexGuard<'_, CoordinatorState> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: CoordinatorState) {
        let mut status = self.status();
        if *status != CoordinatorState::Unmounted {
            *status = next;
        }
    }

    fn is_mounted(&self) -> bool {
        *self.status() != CoordinatorState::Unmounted
    }

    /// Hand a snapshot to observers unless the view has unmounted
    fn apply(&self, snapshot: Snapshot<T>, after: CoordinatorState) -> bool {
        let mut status = self.status();
        if *status == CoordinatorState::Unmounted {
            return false;
        }
        let items = snapshot.len();
        self.snapshots.send_replace(snapshot);
        *status = after;
        drop(status);

        log_event(
            Event::ViewSnapshotUpdated,
            &[("items", &items.to_string()), ("view", &self.name)],
        );
        true
    }

    /// Fetch and apply; `false` once the view has unmounted
    async fn refresh(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        mode: FetchMode,
        after: CoordinatorState,
    ) -> bool {
        if !self.is_mounted() {
            return false;
        }
        self.set_state(CoordinatorState::Fetching);

        let snapshot = match mode {
            FetchMode::Coalesced => {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => return false,
                    snapshot = self.fetcher.fetch() => snapshot,
                }
            }
            FetchMode::Direct => {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => return false,
                    snapshot = self.fetcher.fetch_direct() => snapshot,
                }
            }
        };

        self.apply(snapshot, after)
    }

    fn check_guard(&self) -> GuardDecision {
        let mut guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(guard) => guard.check(&self.fetcher.snapshot()),
            None => GuardDecision::Fresh,
        }
    }
}

/// A mounted view: subscriptions, debounce timer, fetcher and guard
///
/// Dropping the coordinator unmounts it.
pub struct RefreshCoordinator<T: Record> {
    inner: Arc<Inner<T>>,
    snapshots: watch::Receiver<Snapshot<T>>,
}

impl<T: Record> fmt::Debug for RefreshCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Record> RefreshCoordinator<T> {
    /// Mount a view: subscribe to `collections`, start its task
    ///
    /// Fails with [`SyncError::NoRuntime`] outside a tokio runtime, before
    /// anything is subscribed.
    pub fn mount(
        name: impl Into<String>,
        bus: Arc<dyn ChangeBus>,
        fetcher: Arc<SnapshotFetcher<T>>,
        collections: Vec<CollectionKey>,
        config: CoordinatorConfig,
        guard: Option<StaleDataGuard<T>>,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let (snapshot_tx, snapshot_rx) = watch::channel(fetcher.snapshot());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let grace = guard.as_ref().map(|g| g.grace());

        let inner = Arc::new(Inner {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            fetcher,
            bus,
            handles: Mutex::new(Vec::new()),
            status: Mutex::new(CoordinatorState::Idle),
            guard: Mutex::new(guard),
            snapshots: snapshot_tx,
            signals: signal_tx,
            shutdown: shutdown_tx,
        });

        let mut handles = Vec::with_capacity(collections.len());
        for collection in collections {
            let signals = inner.signals.clone();
            let handler: Handler = Arc::new(move |event: &ChangeEvent| {
                let signal = if event.is_refresh_all() {
                    Signal::RefreshAll
                } else {
                    Signal::Changed
                };
                // Receiver gone means the view already stopped
                let _ = signals.send(signal);
            });
            handles.push(inner.bus.subscribe(collection, handler));
        }

        let keys: Vec<&str> = handles.iter().map(|h| h.collection().as_str()).collect();
        log_event(
            Event::ViewMounted,
            &[
                ("collections", &keys.join(",")),
                ("endpoint", inner.fetcher.endpoint()),
                ("view", &inner.name),
            ],
        );

        *inner.handles.lock().unwrap_or_else(PoisonError::into_inner) = handles;
        inner.set_state(CoordinatorState::Subscribed);

        runtime.spawn(Self::run(
            Arc::clone(&inner),
            signal_rx,
            shutdown_rx,
            config,
            grace,
        ));

        Ok(Self {
            inner,
            snapshots: snapshot_rx,
        })
    }

    async fn run(
        inner: Arc<Inner<T>>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
        mut shutdown: watch::Receiver<bool>,
        config: CoordinatorConfig,
        grace: Option<Duration>,
    ) {
        let mounted_at = Instant::now();
        let guard_deadline = grace.map(|g| mounted_at + g);
        let mut guard_pending = guard_deadline.is_some();
        let mut debounce_deadline: Option<Instant> = None;

        if config.initial_fetch
            && !inner
                .refresh(&mut shutdown, FetchMode::Coalesced, CoordinatorState::Subscribed)
                .await
        {
            return;
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                signal = signals.recv() => {
                    match signal {
                        None => break,
                        Some(Signal::RefreshAll) => {
                            // Everything queued so far is covered by this fetch
                            while signals.try_recv().is_ok() {}
                            debounce_deadline = None;
                            log_event(Event::ViewRefreshAll, &[("view", &inner.name)]);
                            if !inner
                                .refresh(&mut shutdown, FetchMode::Coalesced, CoordinatorState::Subscribed)
                                .await
                            {
                                break;
                            }
                        }
                        Some(Signal::Changed) => {
                            debounce_deadline = Some(Instant::now() + config.debounce);
                            inner.set_state(CoordinatorState::Debouncing);
                            log_event(Event::ViewDebounce, &[("view", &inner.name)]);
                        }
                    }
                }

                _ = sleep_until(debounce_deadline.unwrap_or_else(Instant::now)),
                    if debounce_deadline.is_some() =>
                {
                    debounce_deadline = None;
                    if !inner
                        .refresh(&mut shutdown, FetchMode::Coalesced, CoordinatorState::Subscribed)
                        .await
                    {
                        break;
                    }
                }

                _ = sleep_until(guard_deadline.unwrap_or_else(Instant::now)),
                    if guard_pending =>
                {
                    guard_pending = false;
                    match inner.check_guard() {
                        GuardDecision::Fresh => {
                            log_event(Event::StaleGuardFresh, &[("view", &inner.name)]);
                        }
                        GuardDecision::Refetch => {
                            SyncMetrics::global().increment_guard_refetches();
                            log_event(
                                Event::StaleGuardRefetch,
                                &[("endpoint", inner.fetcher.endpoint()), ("view", &inner.name)],
                            );
                            let after = if debounce_deadline.is_some() {
                                CoordinatorState::Debouncing
                            } else {
                                CoordinatorState::Subscribed
                            };
                            if !inner.refresh(&mut shutdown, FetchMode::Direct, after).await {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Unique id of this mount
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> CoordinatorState {
        *self.inner.status()
    }

    /// Whether a refresh is pending or running
    pub fn is_refreshing(&self) -> bool {
        matches!(
            self.state(),
            CoordinatorState::Debouncing | CoordinatorState::Fetching
        )
    }

    /// Latest snapshot handed to the view
    pub fn snapshot(&self) -> Snapshot<T> {
        self.snapshots.borrow().clone()
    }

    /// Independent receiver of snapshot updates
    pub fn watch(&self) -> watch::Receiver<Snapshot<T>> {
        self.snapshots.clone()
    }

    /// Wait for the next snapshot
    pub async fn changed(&mut self) -> SyncResult<Snapshot<T>> {
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::select! {
            biased;
            changed = self.snapshots.changed() => changed.map_err(|_| SyncError::Unmounted)?,
            _ = shutdown.wait_for(|stopped| *stopped) => return Err(SyncError::Unmounted),
        }
        Ok(self.snapshots.borrow_and_update().clone())
    }

    pub fn fetcher(&self) -> &Arc<SnapshotFetcher<T>> {
        &self.inner.fetcher
    }

    /// State of the stale-data guard, if this view has one
    pub fn guard_state(&self) -> Option<GuardState> {
        self.inner
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|g| g.state())
    }

    /// Collections this view is subscribed to
    pub fn collections(&self) -> Vec<CollectionKey> {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|h| h.collection().clone())
            .collect()
    }

    /// Fetch immediately, bypassing the debounce window
    pub fn refresh_now(&self) -> SyncResult<()> {
        if !self.inner.is_mounted() {
            return Err(SyncError::Unmounted);
        }
        self.inner
            .signals
            .send(Signal::RefreshAll)
            .map_err(|_| SyncError::Unmounted)
    }

    /// Unsubscribe, cancel timers and pending effects. Idempotent.
    pub fn unmount(&self) {
        {
            let mut status = self.inner.status();
            if *status == CoordinatorState::Unmounted {
                return;
            }
            *status = CoordinatorState::Unmounted;
        }

        let handles = std::mem::take(
            &mut *self
                .inner
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in &handles {
            self.inner.bus.unsubscribe(handle);
        }
        let _ = self.inner.shutdown.send(true);

        log_event(Event::ViewUnmounted, &[("view", &self.inner.name)]);
    }
}

impl<T: Record> Drop for RefreshCoordinator<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}
