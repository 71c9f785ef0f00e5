use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::models::SweepProgress;
use crate::types::SchedulerState;

/// Progress plus the figures derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct SweepStatus {
    pub state: SchedulerState,
    pub progress: SweepProgress,
    pub total_work: i64,
    /// Successful plus failed queries this sweep.
    pub attempted: i64,
    pub percent_complete: f64,
    pub queries_per_hour: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub latency_p50_ms: Option<u64>,
    pub latency_p95_ms: Option<u64>,
    pub latency_p99_ms: Option<u64>,
    pub last_query_at: Option<DateTime<Utc>>,
    pub consecutive_store_failures: u64,
}

impl SweepStatus {
    pub fn derive(
        progress: SweepProgress,
        now: DateTime<Utc>,
        latency: &LatencyStats,
        health: &HealthState,
    ) -> Self {
        let total_work = progress.total_work();
        let attempted = progress.attempted();
        let (queries_per_hour, estimated_completion) = rate_and_eta(&progress, now);
        let percent_complete = if total_work > 0 {
            (attempted as f64 / total_work as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        let (p50, p95, p99) = latency.percentiles();

        Self {
            state: SchedulerState::from_flags(progress.control_flags()),
            total_work,
            attempted,
            percent_complete,
            queries_per_hour,
            estimated_completion,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            latency_p99_ms: p99,
            last_query_at: health.last_query_at(),
            consecutive_store_failures: health.consecutive_store_failures(),
            progress,
        }
    }
}

/// Observed query rate since the sweep started, and the time the remaining
/// work would take at that rate. No estimate while nothing has been attempted.
pub fn rate_and_eta(progress: &SweepProgress, now: DateTime<Utc>) -> (f64, Option<DateTime<Utc>>) {
    let attempted = progress.attempted();
    let elapsed_ms = (now - progress.sweep_started_at).num_milliseconds();
    if attempted <= 0 || elapsed_ms <= 0 {
        return (0.0, None);
    }
    let per_hour = attempted as f64 / (elapsed_ms as f64 / 3_600_000.0);
    let remaining = (progress.total_work() - attempted).max(0);
    let eta_ms = (remaining as f64 / per_hour * 3_600_000.0).round() as i64;
    (per_hour, Some(now + Duration::milliseconds(eta_ms)))
}
