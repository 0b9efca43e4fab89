//! Observable events
//!
//! Every log line the crate writes names one of these.

use std::fmt;

/// Observable events in the freshness layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// CLI startup begins
    BootStart,
    /// Configuration loaded and validated
    ConfigLoaded,
    /// CLI is reading commands
    Serving,
    /// Shutdown complete
    ShutdownComplete,

    // Invalidation bus
    /// A change event was published
    BusPublish,
    /// A handler was registered
    BusSubscribe,
    /// A handler was removed
    BusUnsubscribe,
    /// A handler panicked during dispatch
    BusSubscriberFailed,
    /// Every registration was dropped
    BusCleared,

    // Views
    /// A view mounted and subscribed
    ViewMounted,
    /// A view unmounted
    ViewUnmounted,
    /// A debounce window started or restarted
    ViewDebounce,
    /// A refresh-all bypassed the debounce window
    ViewRefreshAll,
    /// A snapshot changed
    ViewSnapshotUpdated,

    // Fetches
    /// A read started
    FetchBegin,
    /// A read joined one already in flight
    FetchCoalesced,
    /// A read completed and was applied
    FetchComplete,
    /// A read failed; previous data retained
    FetchFailed,
    /// A read resolved after a newer one and was discarded
    FetchDiscarded,

    // Mutations
    /// A write started
    MutationBegin,
    /// A write is being retried
    MutationRetry,
    /// A retried delete found the row gone; the earlier attempt landed
    MutationAckRecovered,
    /// A write succeeded
    MutationCommitted,
    /// A write failed; nothing published
    MutationFailed,
    /// A write succeeded against a path with no route
    MutationUnrouted,

    // Stale-data guard
    /// The guard found the view populated
    StaleGuardFresh,
    /// The guard forced one direct re-fetch
    StaleGuardRefetch,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "FRESHSYNC_STARTUP_BEGIN",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::Serving => "FRESHSYNC_SERVING",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",

            Event::BusPublish => "BUS_PUBLISH",
            Event::BusSubscribe => "BUS_SUBSCRIBE",
            Event::BusUnsubscribe => "BUS_UNSUBSCRIBE",
            Event::BusSubscriberFailed => "BUS_SUBSCRIBER_FAILED",
            Event::BusCleared => "BUS_CLEARED",

            Event::ViewMounted => "VIEW_MOUNTED",
            Event::ViewUnmounted => "VIEW_UNMOUNTED",
            Event::ViewDebounce => "VIEW_DEBOUNCE",
            Event::ViewRefreshAll => "VIEW_REFRESH_ALL",
            Event::ViewSnapshotUpdated => "VIEW_SNAPSHOT_UPDATED",

            Event::FetchBegin => "FETCH_BEGIN",
            Event::FetchCoalesced => "FETCH_COALESCED",
            Event::FetchComplete => "FETCH_COMPLETE",
            Event::FetchFailed => "FETCH_FAILED",
            Event::FetchDiscarded => "FETCH_DISCARDED",

            Event::MutationBegin => "MUTATION_BEGIN",
            Event::MutationRetry => "MUTATION_RETRY",
            Event::MutationAckRecovered => "MUTATION_ACK_RECOVERED",
            Event::MutationCommitted => "MUTATION_COMMITTED",
            Event::MutationFailed => "MUTATION_FAILED",
            Event::MutationUnrouted => "MUTATION_UNROUTED",

            Event::StaleGuardFresh => "STALE_GUARD_FRESH",
            Event::StaleGuardRefetch => "STALE_GUARD_REFETCH",
        }
    }

    /// Trace-level chatter that is only interesting when debugging timing
    pub fn is_verbose(&self) -> bool {
        matches!(
            self,
            Event::BusSubscribe
                | Event::BusUnsubscribe
                | Event::ViewDebounce
                | Event::FetchBegin
                | Event::FetchCoalesced
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
