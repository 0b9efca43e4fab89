//! # Stale-Data Guard
//!
//! One-shot watchdog for views whose first population sometimes arrives
//! late. When the grace period after mount elapses and the view still
//! shows its empty baseline, exactly one direct re-fetch is issued. The
//! guard never re-arms, so its cost is bounded to one extra read per mount.
//!
//! The timer itself is driven by the owning
//! [`RefreshCoordinator`](super::RefreshCoordinator) so unmount cancels it
//! together with everything else.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::fetcher::Snapshot;

/// Where the guard is in its single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Grace period not yet elapsed
    NotYetChecked,
    /// Checked; the view was populated
    CheckedFresh,
    /// Checked; the view was stale and one direct re-fetch was issued
    CheckedStaleRefetched,
}

/// What the guard decided when its timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Nothing to do
    Fresh,
    /// Issue one direct re-fetch
    Refetch,
}

/// Predicate for "still showing the empty baseline"
pub enum StalePolicy<T> {
    /// Stale only while no read has ever succeeded
    Unpopulated,
    /// Stale while unpopulated or holding zero items
    EmptyOrUnpopulated,
    /// Caller-defined baseline, e.g. an aggregate whose counters are all zero
    Custom(Arc<dyn Fn(&Snapshot<T>) -> bool + Send + Sync>),
}

impl<T> StalePolicy<T> {
    /// Custom baseline predicate
    pub fn custom(predicate: impl Fn(&Snapshot<T>) -> bool + Send + Sync + 'static) -> Self {
        StalePolicy::Custom(Arc::new(predicate))
    }

    pub fn is_stale(&self, snapshot: &Snapshot<T>) -> bool {
        match self {
            StalePolicy::Unpopulated => !snapshot.is_populated(),
            StalePolicy::EmptyOrUnpopulated => !snapshot.is_populated() || snapshot.is_empty(),
            StalePolicy::Custom(predicate) => predicate(snapshot),
        }
    }
}

impl<T> Clone for StalePolicy<T> {
    fn clone(&self) -> Self {
        match self {
            StalePolicy::Unpopulated => StalePolicy::Unpopulated,
            StalePolicy::EmptyOrUnpopulated => StalePolicy::EmptyOrUnpopulated,
            StalePolicy::Custom(predicate) => StalePolicy::Custom(Arc::clone(predicate)),
        }
    }
}

impl<T> fmt::Debug for StalePolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StalePolicy::Unpopulated => write!(f, "Unpopulated"),
            StalePolicy::EmptyOrUnpopulated => write!(f, "EmptyOrUnpopulated"),
            StalePolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// One-shot stale-data watchdog
#[derive(Debug, Clone)]
pub struct StaleDataGuard<T> {
    grace: Duration,
    policy: StalePolicy<T>,
    state: GuardState,
}

impl<T> StaleDataGuard<T> {
    pub fn new(grace: Duration, policy: StalePolicy<T>) -> Self {
        Self {
            grace,
            policy,
            state: GuardState::NotYetChecked,
        }
    }

    /// Grace period after mount before the check runs
    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Whether the single check is still ahead
    pub fn is_pending(&self) -> bool {
        self.state == GuardState::NotYetChecked
    }

    /// Run the single check; later calls always answer `Fresh`
    pub fn check(&mut self, snapshot: &Snapshot<T>) -> GuardDecision {
        if !self.is_pending() {
            return GuardDecision::Fresh;
        }

        if self.policy.is_stale(snapshot) {
            self.state = GuardState::CheckedStaleRefetched;
            GuardDecision::Refetch
        } else {
            self.state = GuardState::CheckedFresh;
            GuardDecision::Fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn populated(items: Vec<u32>) -> Snapshot<u32> {
        Snapshot {
            data: items,
            fetched_at: Some(Utc::now()),
            is_loading: false,
            error: None,
        }
    }

    #[test]
    fn test_unpopulated_triggers_refetch() {
        let mut guard = StaleDataGuard::new(Duration::from_secs(2), StalePolicy::<u32>::Unpopulated);
        assert!(guard.is_pending());

        assert_eq!(guard.check(&Snapshot::default()), GuardDecision::Refetch);
        assert_eq!(guard.state(), GuardState::CheckedStaleRefetched);
    }

    #[test]
    fn test_legitimately_empty_is_fresh_under_unpopulated_policy() {
        let mut guard = StaleDataGuard::new(Duration::from_secs(2), StalePolicy::Unpopulated);
        assert_eq!(guard.check(&populated(vec![])), GuardDecision::Fresh);
        assert_eq!(guard.state(), GuardState::CheckedFresh);
    }

    #[test]
    fn test_zero_items_is_stale_under_empty_policy() {
        let mut guard =
            StaleDataGuard::new(Duration::from_secs(2), StalePolicy::EmptyOrUnpopulated);
        assert_eq!(guard.check(&populated(vec![])), GuardDecision::Refetch);
    }

    #[test]
    fn test_fires_at_most_once() {
        let mut guard =
            StaleDataGuard::new(Duration::from_secs(2), StalePolicy::<u32>::EmptyOrUnpopulated);
        assert_eq!(guard.check(&Snapshot::default()), GuardDecision::Refetch);
        assert_eq!(guard.check(&Snapshot::default()), GuardDecision::Fresh);
        assert_eq!(guard.state(), GuardState::CheckedStaleRefetched);
        assert!(!guard.is_pending());
    }

    #[test]
    fn test_custom_baseline() {
        let policy = StalePolicy::custom(|s: &Snapshot<u32>| {
            s.data.first().map_or(true, |total| *total == 0)
        });
        let mut guard = StaleDataGuard::new(Duration::from_secs(2), policy.clone());
        assert_eq!(guard.check(&populated(vec![0])), GuardDecision::Refetch);

        let mut guard = StaleDataGuard::new(Duration::from_secs(2), policy);
        assert_eq!(guard.check(&populated(vec![7])), GuardDecision::Fresh);
    }
}
