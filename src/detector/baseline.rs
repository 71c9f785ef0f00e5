//! Rolling per-route price baselines.
//!
//! Every new sample triggers a full reload of the key's window and a fresh
//! set of statistics. Recomputations of the same key are serialized so two
//! concurrent writers cannot interleave a read of the window with a stale
//! upsert; different keys run independently.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::models::RouteBaseline;
use crate::db::Database;
use crate::error::Result;
use crate::types::BaselineKey;

/// Summary statistics over one window of prices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation.
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub p10: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
}

/// None for an empty input. Non-finite prices are ignored.
pub fn compute_stats(prices: &[f64]) -> Option<PriceStats> {
    let mut sorted: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;

    Some(PriceStats {
        count: sorted.len(),
        mean,
        median: percentile(&sorted, 0.5),
        stddev: variance.sqrt(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p10: percentile(&sorted, 0.10),
        p25: percentile(&sorted, 0.25),
        p75: percentile(&sorted, 0.75),
        p90: percentile(&sorted, 0.90),
    })
}

/// Linear interpolation between closest ranks. `sorted` must be non-empty and ascending.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub struct BaselineEngine {
    db: Database,
    window: Duration,
    min_samples: i64,
    locks: DashMap<BaselineKey, Arc<Mutex<()>>>,
}

impl BaselineEngine {
    pub fn new(db: Database, window_days: i64, min_samples: i64) -> Self {
        Self {
            db,
            window: Duration::days(window_days.max(1)),
            min_samples: min_samples.max(1),
            locks: DashMap::new(),
        }
    }

    /// A baseline can back a classification only with enough samples and a
    /// window that has not gone stale.
    pub fn is_usable(&self, baseline: &RouteBaseline, now: DateTime<Utc>) -> bool {
        baseline.sample_count >= self.min_samples && baseline.window_end >= now - self.window
    }

    /// Recompute and store the baseline for `key` over `[now - window, now]`.
    /// Returns the stored baseline when it is usable.
    pub async fn recompute(
        &self,
        key: &BaselineKey,
        now: DateTime<Utc>,
    ) -> Result<Option<RouteBaseline>> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let window_start = now - self.window;
        let prices = self.db.window_prices(key, window_start, now).await?;

        let Some(stats) = compute_stats(&prices) else {
            // Nothing in the window: leave whatever is stored as it is.
            let stored = self.db.get_route_baseline(key).await?;
            return Ok(stored.filter(|b| self.is_usable(b, now)));
        };

        let baseline = RouteBaseline {
            origin: key.origin.clone(),
            destination: key.destination.clone(),
            trip_length: key.trip_length,
            cabin_class: key.cabin_class,
            currency: key.currency.clone(),
            sample_count: stats.count as i64,
            mean_price: stats.mean,
            median_price: stats.median,
            stddev_price: stats.stddev,
            min_price: stats.min,
            max_price: stats.max,
            p10_price: stats.p10,
            p25_price: stats.p25,
            p75_price: stats.p75,
            p90_price: stats.p90,
            window_start,
            window_end: now,
            updated_at: now,
        };
        self.db.upsert_route_baseline(&baseline).await?;

        debug!(
            key = %key,
            samples = stats.count,
            mean = stats.mean,
            median = stats.median,
            "baseline recomputed"
        );

        Ok(self.is_usable(&baseline, now).then_some(baseline))
    }
}
