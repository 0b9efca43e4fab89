//! # Dashboard Counters
//!
//! Two ways a dashboard can show its totals:
//!
//! - derived from lists the views already hold ([`DashboardCounters::from_lists`])
//! - read from the aggregate stats endpoint through a
//!   [`ResponseShape::Single`] fetcher ([`stats_fetcher`])
//!
//! Neither source is authoritative. They can disagree while the backend
//! catches up; the stats view is the one usually paired with a
//! [`StaleDataGuard`] using [`zero_counters_policy`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backend::Backend;
use super::fetcher::{ResponseShape, Snapshot, SnapshotFetcher};
use super::guard::{StaleDataGuard, StalePolicy};

/// Default aggregate endpoint
pub const STATS_ENDPOINT: &str = "/api/dashboard-stats";

/// Totals shown on a manager dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounters {
    #[serde(default, alias = "totalEscolas")]
    pub total_schools: u64,
    #[serde(default, alias = "totalUsuarios")]
    pub total_users: u64,
    #[serde(default, alias = "totalTurmas")]
    pub total_classes: u64,
    #[serde(default, alias = "totalProfessores")]
    pub total_teachers: u64,
    #[serde(default, alias = "totalAlunos")]
    pub total_students: u64,
}

impl DashboardCounters {
    /// Count the items of snapshots already held by other views
    pub fn from_lists<S, U, C, P, A>(
        schools: &Snapshot<S>,
        users: &Snapshot<U>,
        classes: &Snapshot<C>,
        teachers: &Snapshot<P>,
        students: &Snapshot<A>,
    ) -> Self {
        Self {
            total_schools: schools.len() as u64,
            total_users: users.len() as u64,
            total_classes: classes.len() as u64,
            total_teachers: teachers.len() as u64,
            total_students: students.len() as u64,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Baseline of a stats view: never populated, or every counter zero
pub fn zero_counters_policy() -> StalePolicy<DashboardCounters> {
    StalePolicy::custom(|snapshot: &Snapshot<DashboardCounters>| {
        snapshot
            .data
            .first()
            .map_or(true, DashboardCounters::is_zero)
    })
}

/// Fetcher of the aggregate endpoint
pub fn stats_fetcher(
    backend: Arc<dyn Backend>,
    endpoint: impl Into<String>,
) -> SnapshotFetcher<DashboardCounters> {
    SnapshotFetcher::new(backend, endpoint, ResponseShape::Single)
}

/// Guard for a stats view
pub fn stats_guard(grace: Duration) -> StaleDataGuard<DashboardCounters> {
    StaleDataGuard::new(grace, zero_counters_policy())
}
