//! Shared health state for the /health endpoint.
//! Updated by the sweep scheduler, the alert publisher and the notifier.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Shared health metrics. Updated by sweep components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// Millisecond timestamp of the last successful provider query (0 = none).
    pub last_query_at_ms: AtomicI64,
    /// Progress saves that failed in a row. Reset by the next successful save.
    pub consecutive_store_failures: AtomicU64,
    /// Alerts published but not yet handled by the notifier.
    pub pending_notifications: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_last_query_at(&self, at: DateTime<Utc>) {
        self.last_query_at_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_query_at(&self) -> Option<DateTime<Utc>> {
        match self.last_query_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn record_store_failure(&self) -> u64 {
        self.consecutive_store_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_store_success(&self) {
        self.consecutive_store_failures.store(0, Ordering::Relaxed);
    }

    pub fn consecutive_store_failures(&self) -> u64 {
        self.consecutive_store_failures.load(Ordering::Relaxed)
    }

    pub fn inc_pending_notifications(&self) {
        self.pending_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_pending_notifications(&self) {
        let _ = self
            .pending_notifications
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn pending_notifications(&self) -> u64 {
        self.pending_notifications.load(Ordering::Relaxed)
    }
}
