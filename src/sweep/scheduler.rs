//! The continuous sweep loop.
//!
//! One task walks the route universe, one serial provider query at a time,
//! feeding every quote into the deal pipeline. The cursor lives in the
//! singleton progress row and is saved after every route, so a restarted
//! process picks up where the last one left off.
//!
//! Control flags are read from the store before every query. The in-process
//! watch channel only serves to interrupt a provider call or a pacing sleep
//! early; an interrupted route is abandoned and its cursor left in place.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{Config, CONTROL_POLL_INTERVAL_SECS};
use crate::db::models::{NewSweepStats, SweepProgress};
use crate::db::Database;
use crate::detector::DealPipeline;
use crate::error::{AppError, Result};
use crate::provider::{PriceSource, ProviderError};
use crate::sweep::pacing::{self, PacingInput};
use crate::sweep::universe::WorkQueue;
use crate::types::{
    utc_now, Airport, CabinClass, ControlFlags, FareQuery, FareQuote, PriceSample, Route,
    SourceType,
};

/// Everything about a query that is not stored in the progress row.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub airports: Vec<Airport>,
    pub currency: String,
    pub cabin_class: CabinClass,
    pub passengers: i64,
    pub max_stops: Option<i64>,
    pub departure_lead_days: i64,
    pub query_timeout: Duration,
    pub max_delay_ms: u64,
    /// How often an idle or paused scheduler re-reads the store.
    pub poll_interval: Duration,
}

impl SchedulerConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            airports: cfg.airports.clone(),
            currency: cfg.currency.clone(),
            cabin_class: cfg.cabin_class,
            passengers: cfg.passengers,
            max_stops: cfg.max_stops,
            departure_lead_days: cfg.departure_lead_days,
            query_timeout: Duration::from_secs(cfg.provider_timeout_secs.max(1)),
            max_delay_ms: cfg.max_delay_ms,
            poll_interval: Duration::from_secs(CONTROL_POLL_INTERVAL_SECS),
        }
    }
}

enum Interrupted {
    Stopped,
}

/// Per-route tallies, committed to the progress row only once the whole
/// route has been attempted.
#[derive(Default)]
struct RouteTally {
    succeeded: i64,
    failed: i64,
    delay_ms: i64,
    last_error: Option<String>,
}

impl RouteTally {
    fn attempted(&self) -> i64 {
        self.succeeded + self.failed
    }
}

pub struct SweepScheduler {
    db: Database,
    source: Arc<dyn PriceSource>,
    pipeline: Arc<DealPipeline>,
    config: SchedulerConfig,
    flags_rx: watch::Receiver<ControlFlags>,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
    /// Last committed progress. Authoritative over the store for the life of
    /// the process, so a failed save does not rewind the cursor.
    cursor: Option<SweepProgress>,
}

impl SweepScheduler {
    pub fn new(
        db: Database,
        source: Arc<dyn PriceSource>,
        pipeline: Arc<DealPipeline>,
        config: SchedulerConfig,
        flags_rx: watch::Receiver<ControlFlags>,
        latency: Arc<LatencyStats>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            db,
            source,
            pipeline,
            config,
            flags_rx,
            latency,
            health,
            cursor: None,
        }
    }

    /// Supervisor loop: sweep while the flags say running, otherwise wait for
    /// a control change or the next poll.
    pub async fn run(mut self) {
        loop {
            let flags = self.read_flags().await;
            if flags.is_running {
                if let Err(e) = self.run_sweep().await {
                    error!("[SWEEP] sweep aborted: {e}");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                continue;
            }
            wait_for_signal(&mut self.flags_rx, self.config.poll_interval).await;
        }
    }

    /// Run from the persisted cursor until stopped. Sweeps roll over into the
    /// next one indefinitely.
    pub async fn run_sweep(&mut self) -> Result<()> {
        let mut progress = self.load_progress().await?;
        let settings = progress.settings();
        let queue = WorkQueue::from_airports(
            &self.config.airports,
            settings.international_only,
            settings.trip_lengths.clone(),
        );
        if queue.route_count() == 0 || queue.trip_lengths().is_empty() {
            return Err(AppError::Config(format!(
                "empty sweep universe ({} routes, trip lengths {:?})",
                queue.route_count(),
                queue.trip_lengths()
            )));
        }

        let total_routes = queue.route_count() as i64;
        let signature = queue.signature();
        let now = utc_now();
        // An empty stored signature predates any run: only the count can be checked.
        let reordered = !progress.route_signature.is_empty() && progress.route_signature != signature;
        if progress.total_routes != total_routes || reordered {
            if progress.total_routes != 0 {
                warn!(
                    "[SWEEP] route universe changed ({} -> {} routes, reordered: {reordered}), restarting sweep {} from route 0",
                    progress.total_routes, total_routes, progress.sweep_number
                );
            }
            reset_counters(&mut progress, now);
            progress.total_routes = total_routes;
        } else if progress.route_index == 0 && progress.attempted() == 0 {
            // Nothing done yet: the sweep clock starts now, not when the row was created.
            progress.sweep_started_at = now;
        }
        progress.route_signature = signature;
        progress.last_updated_at = now;
        self.persist(&progress).await;

        info!(
            event = "SWEEP_RESUME",
            sweep = progress.sweep_number,
            route_index = progress.route_index,
            total_routes,
            trip_lengths = ?settings.trip_lengths,
            pacing = %settings.pacing_mode,
            "[SWEEP] running sweep {} from route {}/{}",
            progress.sweep_number,
            progress.route_index,
            total_routes,
        );

        let mut first_query = true;
        loop {
            if progress.route_index >= progress.total_routes {
                if !self.complete_sweep(&mut progress).await {
                    if self.sleep_or_stop(self.config.poll_interval).await.is_err()
                        || !self.checkpoint(&progress).await
                    {
                        self.log_stop(&progress);
                        return Ok(());
                    }
                    continue;
                }
                self.persist(&progress).await;
            }

            let route_index = progress.route_index as usize;
            let Some(route) = queue.route(route_index).cloned() else {
                // Unreachable while route_index < total_routes == route_count.
                return Err(AppError::Config(format!("route index {route_index} out of range")));
            };

            let mut tally = RouteTally::default();
            for &trip_length in queue.trip_lengths() {
                if !first_query {
                    let delay = self.next_delay(&progress, &tally);
                    if self.sleep_or_stop(delay).await.is_err() {
                        self.log_stop(&progress);
                        return Ok(());
                    }
                    tally.delay_ms += delay.as_millis() as i64;
                }

                if !self.checkpoint(&progress).await {
                    self.log_stop(&progress);
                    return Ok(());
                }
                first_query = false;

                let query = self.build_query(&route, trip_length, utc_now().date_naive());
                let result = match self.query_or_stop(&query).await {
                    Ok(result) => result,
                    Err(Interrupted::Stopped) => {
                        self.log_stop(&progress);
                        return Ok(());
                    }
                };
                self.handle_result(&query, result, &mut tally).await;
            }

            progress.current_origin = Some(route.origin.clone());
            progress.current_destination = Some(route.destination.clone());
            progress.queries_completed += tally.succeeded;
            progress.errors_count += tally.failed;
            progress.total_delay_ms += tally.delay_ms;
            if tally.last_error.is_some() {
                progress.last_error = tally.last_error;
            }
            progress.route_index += 1;
            progress.last_updated_at = utc_now();
            self.persist(&progress).await;

            debug!(
                route = %route,
                route_index = progress.route_index,
                ok = tally.succeeded,
                failed = tally.failed,
                "route done"
            );
        }
    }

    /// Stored row, with the in-memory cursor laid over it when one exists.
    async fn load_progress(&mut self) -> Result<SweepProgress> {
        let mut stored = self.db.load_sweep_progress().await?;
        if let Some(mem) = self.cursor.clone() {
            stored.sweep_number = mem.sweep_number;
            stored.route_index = mem.route_index;
            stored.total_routes = mem.total_routes;
            stored.route_signature = mem.route_signature;
            stored.current_origin = mem.current_origin;
            stored.current_destination = mem.current_destination;
            stored.queries_completed = mem.queries_completed;
            stored.errors_count = mem.errors_count;
            stored.last_error = mem.last_error;
            stored.total_delay_ms = mem.total_delay_ms;
            stored.sweep_started_at = mem.sweep_started_at;
            stored.last_updated_at = mem.last_updated_at;
        }
        Ok(stored)
    }

    /// Store first, in-process signal as the fallback.
    async fn read_flags(&mut self) -> ControlFlags {
        // Mark the in-process value seen first so a change racing the read
        // still wakes `stop_signalled`.
        let local = *self.flags_rx.borrow_and_update();
        match self.db.load_control_flags().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!("[SWEEP] control flags unreadable, using in-process copy: {e}");
                local
            }
        }
    }

    /// Before every query. Blocks while paused; false once stopped.
    async fn checkpoint(&mut self, progress: &SweepProgress) -> bool {
        let mut announced = false;
        loop {
            let flags = self.read_flags().await;
            if !flags.is_running {
                return false;
            }
            if !flags.is_paused {
                if announced {
                    info!("[SWEEP] resumed at route {}/{}", progress.route_index, progress.total_routes);
                }
                return true;
            }
            if !announced {
                info!("[SWEEP] paused at route {}/{}", progress.route_index, progress.total_routes);
                announced = true;
            }
            wait_for_signal(&mut self.flags_rx, self.config.poll_interval).await;
        }
    }

    fn next_delay(&self, progress: &SweepProgress, tally: &RouteTally) -> Duration {
        let elapsed_ms = (utc_now() - progress.sweep_started_at).num_milliseconds().max(0);
        pacing::next_delay(&PacingInput {
            mode: progress.pacing_mode,
            target_duration_hours: progress.target_duration_hours,
            min_delay_ms: progress.min_delay_ms.max(0) as u64,
            max_delay_ms: self.config.max_delay_ms,
            total_work: progress.total_work().max(0) as u64,
            completed: (progress.attempted() + tally.attempted()).max(0) as u64,
            elapsed_ms: elapsed_ms as u64,
        })
    }

    async fn sleep_or_stop(&mut self, delay: Duration) -> std::result::Result<(), Interrupted> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = stop_signalled(&mut self.flags_rx) => Err(Interrupted::Stopped),
        }
    }

    async fn query_or_stop(
        &mut self,
        query: &FareQuery,
    ) -> std::result::Result<std::result::Result<FareQuote, ProviderError>, Interrupted> {
        let timeout = self.config.query_timeout;
        let started = Instant::now();
        let call = tokio::time::timeout(timeout, self.source.query(query));
        tokio::select! {
            res = call => {
                self.latency.record(started.elapsed());
                Ok(res.unwrap_or_else(|_| Err(ProviderError::Timeout(timeout.as_secs()))))
            }
            _ = stop_signalled(&mut self.flags_rx) => Err(Interrupted::Stopped),
        }
    }

    async fn handle_result(
        &self,
        query: &FareQuery,
        result: std::result::Result<FareQuote, ProviderError>,
        tally: &mut RouteTally,
    ) {
        match result {
            Ok(quote) => {
                tally.succeeded += 1;
                let queried_at = utc_now();
                self.health.set_last_query_at(queried_at);
                let sample = PriceSample::from_quote(query, quote, SourceType::Sweep, queried_at);
                debug!(
                    origin = %query.origin,
                    destination = %query.destination,
                    trip_length = query.trip_length,
                    price = sample.price,
                    "quote"
                );
                if let Err(e) = self.pipeline.process(&sample).await {
                    error!(
                        "[PIPELINE] {}-{} {}d: {e}",
                        query.origin, query.destination, query.trip_length
                    );
                }
            }
            Err(e) => {
                tally.failed += 1;
                warn!(
                    "[SWEEP] query {}-{} {}d failed: {e}",
                    query.origin, query.destination, query.trip_length
                );
                tally.last_error = Some(e.to_string());
            }
        }
    }

    pub fn build_query(&self, route: &Route, trip_length: i64, today: NaiveDate) -> FareQuery {
        let departure_date = today + chrono::Duration::days(self.config.departure_lead_days);
        let return_date =
            (trip_length > 0).then(|| departure_date + chrono::Duration::days(trip_length));
        FareQuery {
            origin: route.origin.clone(),
            destination: route.destination.clone(),
            departure_date,
            return_date,
            trip_length,
            passengers: self.config.passengers,
            cabin_class: self.config.cabin_class,
            stops: self.config.max_stops,
            currency: self.config.currency.clone(),
        }
    }

    /// Append the finished sweep's stats and roll the cursor over. False when
    /// the append failed; the cursor then stays at the end and is retried.
    async fn complete_sweep(&self, progress: &mut SweepProgress) -> bool {
        let now = utc_now();
        let (min_price, max_price) = match self.db.sweep_price_range(progress.sweep_started_at).await {
            Ok(range) => range,
            Err(e) => {
                warn!("[SWEEP] price range unavailable for sweep {}: {e}", progress.sweep_number);
                (None, None)
            }
        };
        let attempted = progress.attempted();
        let stats = NewSweepStats {
            sweep_number: progress.sweep_number,
            started_at: progress.sweep_started_at,
            completed_at: now,
            total_routes: progress.total_routes,
            successful_queries: progress.queries_completed,
            failed_queries: progress.errors_count,
            total_duration_seconds: (now - progress.sweep_started_at).num_seconds().max(0),
            avg_delay_ms: if attempted > 0 {
                progress.total_delay_ms as f64 / attempted as f64
            } else {
                0.0
            },
            min_price_found: min_price,
            max_price_found: max_price,
        };

        match self.db.append_sweep_stats(&stats).await {
            Ok(true) => info!(
                event = "SWEEP_COMPLETE",
                sweep = stats.sweep_number,
                routes = stats.total_routes,
                ok = stats.successful_queries,
                failed = stats.failed_queries,
                duration_s = stats.total_duration_seconds,
                "[SWEEP] sweep {} complete | {} routes | {} ok / {} failed | {}s | avg delay {:.0}ms",
                stats.sweep_number,
                stats.total_routes,
                stats.successful_queries,
                stats.failed_queries,
                stats.total_duration_seconds,
                stats.avg_delay_ms,
            ),
            Ok(false) => warn!(
                "[SWEEP] sweep {} already recorded, rolling over",
                stats.sweep_number
            ),
            Err(e) => {
                error!("[SWEEP] could not record sweep {}: {e}", stats.sweep_number);
                return false;
            }
        }

        progress.sweep_number += 1;
        reset_counters(progress, now);
        true
    }

    async fn persist(&mut self, progress: &SweepProgress) {
        match self.db.save_sweep_progress(progress).await {
            Ok(()) => self.health.record_store_success(),
            Err(e) => {
                let failures = self.health.record_store_failure();
                error!(
                    "[SWEEP] progress save failed ({failures} in a row), retrying next step: {e}"
                );
            }
        }
        self.cursor = Some(progress.clone());
    }

    fn log_stop(&self, progress: &SweepProgress) {
        info!(
            event = "SWEEP_STOP",
            sweep = progress.sweep_number,
            route_index = progress.route_index,
            "[SWEEP] stopped at route {}/{} of sweep {}",
            progress.route_index,
            progress.total_routes,
            progress.sweep_number,
        );
    }
}

fn reset_counters(progress: &mut SweepProgress, now: DateTime<Utc>) {
    progress.route_index = 0;
    progress.current_origin = None;
    progress.current_destination = None;
    progress.queries_completed = 0;
    progress.errors_count = 0;
    progress.last_error = None;
    progress.total_delay_ms = 0;
    progress.sweep_started_at = now;
    progress.last_updated_at = now;
}

/// Resolves on the first in-process change that clears `is_running`.
/// Changes seen before the call do not count.
async fn stop_signalled(rx: &mut watch::Receiver<ControlFlags>) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if !rx.borrow_and_update().is_running {
            return;
        }
    }
}

/// Wait for a control change or `poll`, whichever comes first.
async fn wait_for_signal(rx: &mut watch::Receiver<ControlFlags>, poll: Duration) {
    if let Ok(Err(_)) = tokio::time::timeout(poll, rx.changed()).await {
        // No controller left; fall back to polling the store.
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertPolicy, AlertPublisher};
    use crate::detector::BaselineEngine;
    use crate::sweep::SweepController;
    use crate::types::{ControlCommand, DealClassification, PacingMode, SweepSettings};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockSource {
        calls: Mutex<Vec<FareQuery>>,
        /// Every n-th call (1-based) fails.
        fail_every: Option<usize>,
        /// Calls block forever once this many have been made.
        hang_after: Option<usize>,
    }

    impl MockSource {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_every: None,
                hang_after: None,
            }
        }

        fn calls(&self) -> Vec<FareQuery> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceSource for MockSource {
        async fn query(&self, query: &FareQuery) -> std::result::Result<FareQuote, ProviderError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(query.clone());
                calls.len()
            };
            if self.hang_after.is_some_and(|limit| n > limit) {
                std::future::pending::<()>().await;
            }
            if self.fail_every.is_some_and(|every| n % every == 0) {
                return Err(ProviderError::Status {
                    status: 503,
                    body: "busy".into(),
                });
            }
            Ok(FareQuote {
                price: 400.0 + (n % 7) as f64 * 10.0,
                currency: "USD".into(),
                distance_miles: Some(3000.0),
                cost_per_mile: None,
                raw_offer: None,
            })
        }
    }

    fn airports() -> Vec<Airport> {
        vec![
            Airport::new("JFK", "US"),
            Airport::new("LHR", "GB"),
            Airport::new("CDG", "FR"),
        ]
    }

    fn scheduler_config(airports: Vec<Airport>) -> SchedulerConfig {
        SchedulerConfig {
            airports,
            currency: "USD".into(),
            cabin_class: CabinClass::Economy,
            passengers: 1,
            max_stops: None,
            departure_lead_days: 30,
            query_timeout: Duration::from_secs(5),
            max_delay_ms: 0,
            poll_interval: Duration::from_millis(20),
        }
    }

    struct Harness {
        db: Database,
        source: Arc<MockSource>,
        controller: SweepController,
        health: Arc<HealthState>,
        handle: tokio::task::JoinHandle<()>,
    }

    async fn start(source: MockSource, airports: Vec<Airport>, seed: Option<SweepProgress>) -> Harness {
        let db = Database::open_in_memory().await.unwrap();
        db.ensure_sweep_progress(&SweepSettings {
            trip_lengths: vec![7, 14],
            pacing_mode: PacingMode::Fixed,
            target_duration_hours: 1.0,
            min_delay_ms: 0,
            international_only: false,
        })
        .await
        .unwrap();
        if let Some(seed) = seed {
            db.save_sweep_progress(&seed).await.unwrap();
        }

        let health = Arc::new(HealthState::new());
        let publisher = AlertPublisher::new(
            db.clone(),
            AlertPolicy {
                min_classification: DealClassification::Great,
                min_score: 0.0,
                republish_on_upgrade: true,
                channels: vec![],
            },
            None,
            Arc::clone(&health),
        );
        let pipeline = Arc::new(DealPipeline::new(
            db.clone(),
            BaselineEngine::new(db.clone(), 30, 5),
            publisher,
            72,
        ));

        let (controller, flags_rx) = SweepController::new(db.clone(), ControlFlags::default());
        let source = Arc::new(source);
        let scheduler = SweepScheduler::new(
            db.clone(),
            Arc::clone(&source) as Arc<dyn PriceSource>,
            pipeline,
            scheduler_config(airports),
            flags_rx,
            Arc::new(LatencyStats::new()),
            Arc::clone(&health),
        );
        let handle = tokio::spawn(scheduler.run());
        Harness {
            db,
            source,
            controller,
            health,
            handle,
        }
    }

    async fn wait_until<F, Fut>(mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !cond().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn resumes_at_persisted_cursor() {
        let table = crate::config::default_airports();
        let queue = WorkQueue::from_airports(&table, false, vec![7, 14]);
        assert!(queue.route_count() > 500);

        let db = Database::open_in_memory().await.unwrap();
        let defaults = SweepSettings {
            trip_lengths: vec![7, 14],
            pacing_mode: PacingMode::Fixed,
            target_duration_hours: 1.0,
            min_delay_ms: 0,
            international_only: false,
        };
        let mut seed = db.ensure_sweep_progress(&defaults).await.unwrap();
        seed.sweep_number = 3;
        seed.route_index = 500;
        seed.total_routes = queue.route_count() as i64;
        seed.queries_completed = 1000;

        let mut source = MockSource::new();
        source.hang_after = Some(1);
        let h = start(source, table, Some(seed)).await;
        h.controller.apply(ControlCommand::Start).await.unwrap();

        let source = Arc::clone(&h.source);
        wait_until(|| {
            let source = Arc::clone(&source);
            async move { !source.calls().is_empty() }
        })
        .await;

        let first = &h.source.calls()[0];
        let expected = queue.route(500).unwrap();
        assert_eq!(first.origin, expected.origin);
        assert_eq!(first.destination, expected.destination);
        assert_eq!(first.trip_length, 7);

        // Stop lands while the second query hangs; the route is abandoned.
        wait_until(|| {
            let source = Arc::clone(&source);
            async move { source.calls().len() == 2 }
        })
        .await;
        h.controller.apply(ControlCommand::Stop).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let p = h.db.load_sweep_progress().await.unwrap();
        assert_eq!(p.sweep_number, 3);
        assert_eq!(p.route_index, 500);
        assert_eq!(p.queries_completed, 1000);
        assert!(!p.is_running);
        h.handle.abort();
    }

    #[tokio::test]
    async fn completed_sweep_is_recorded_and_rolls_over() {
        let mut source = MockSource::new();
        source.fail_every = Some(4);
        let h = start(source, airports(), None).await;
        h.controller.apply(ControlCommand::Start).await.unwrap();

        let db = h.db.clone();
        wait_until(|| {
            let db = db.clone();
            async move { !db.sweep_history(10, 0).await.unwrap().is_empty() }
        })
        .await;
        h.controller.apply(ControlCommand::Stop).await.unwrap();
        h.handle.abort();

        let history = h.db.sweep_history(10, 0).await.unwrap();
        let first = history.last().unwrap();
        assert_eq!(first.sweep_number, 1);
        assert_eq!(first.total_routes, 6);
        // 6 routes x 2 trip lengths, every fourth call failing
        assert_eq!(first.successful_queries + first.failed_queries, 12);
        assert_eq!(first.failed_queries, 3);
        assert!(first.min_price_found.is_some());

        let p = h.db.load_sweep_progress().await.unwrap();
        assert!(p.sweep_number >= 2);
        assert!(p.route_index <= p.total_routes);
        assert!(h.health.last_query_at().is_some());
    }

    #[tokio::test]
    async fn paused_scheduler_makes_no_queries() {
        let h = start(MockSource::new(), airports(), None).await;
        h.controller.apply(ControlCommand::Start).await.unwrap();
        h.controller.apply(ControlCommand::Pause).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let before = h.source.calls().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.source.calls().len(), before);

        h.controller.apply(ControlCommand::Resume).await.unwrap();
        let source = Arc::clone(&h.source);
        wait_until(|| {
            let source = Arc::clone(&source);
            async move { source.calls().len() > before }
        })
        .await;
        h.handle.abort();
    }

    #[tokio::test]
    async fn failures_are_counted_and_sweep_continues() {
        let mut source = MockSource::new();
        source.fail_every = Some(1);
        let h = start(source, crate::config::default_airports(), None).await;
        h.controller.apply(ControlCommand::Start).await.unwrap();

        let db = h.db.clone();
        wait_until(|| {
            let db = db.clone();
            async move { db.load_sweep_progress().await.unwrap().route_index >= 3 }
        })
        .await;
        h.controller.apply(ControlCommand::Pause).await.unwrap();
        h.handle.abort();

        let p = h.db.load_sweep_progress().await.unwrap();
        assert_eq!(p.queries_completed, 0);
        assert!(p.errors_count >= 6);
        assert!(p.last_error.as_deref().unwrap_or_default().contains("503"));
    }

    #[tokio::test]
    async fn changed_universe_resets_cursor() {
        let db_airports = crate::config::default_airports();
        let big = WorkQueue::from_airports(&db_airports, false, vec![7, 14]);
        let db = Database::open_in_memory().await.unwrap();
        let mut seed = db
            .ensure_sweep_progress(&SweepSettings {
                trip_lengths: vec![7, 14],
                pacing_mode: PacingMode::Fixed,
                target_duration_hours: 1.0,
                min_delay_ms: 0,
                international_only: false,
            })
            .await
            .unwrap();
        seed.total_routes = big.route_count() as i64;
        seed.route_index = 400;
        seed.sweep_number = 5;

        let mut source = MockSource::new();
        source.hang_after = Some(0);
        let h = start(source, airports(), Some(seed)).await;
        h.controller.apply(ControlCommand::Start).await.unwrap();

        let source = Arc::clone(&h.source);
        wait_until(|| {
            let source = Arc::clone(&source);
            async move { !source.calls().is_empty() }
        })
        .await;
        let p = h.db.load_sweep_progress().await.unwrap();
        assert_eq!(p.sweep_number, 5);
        assert_eq!(p.total_routes, 6);
        assert_eq!(p.route_index, 0);
        assert_eq!(h.source.calls()[0].origin, "JFK");
        h.handle.abort();
    }

    /// A scheduler that is never spawned, for driving single steps.
    fn idle_scheduler(db: Database, airports: Vec<Airport>) -> SweepScheduler {
        let health = Arc::new(HealthState::new());
        let publisher = AlertPublisher::new(
            db.clone(),
            AlertPolicy {
                min_classification: DealClassification::Great,
                min_score: 0.0,
                republish_on_upgrade: true,
                channels: vec![],
            },
            None,
            Arc::clone(&health),
        );
        let pipeline = Arc::new(DealPipeline::new(
            db.clone(),
            BaselineEngine::new(db.clone(), 30, 5),
            publisher,
            72,
        ));
        let (_tx, rx) = watch::channel(ControlFlags::default());
        SweepScheduler::new(
            db,
            Arc::new(MockSource::new()),
            pipeline,
            scheduler_config(airports),
            rx,
            Arc::new(LatencyStats::new()),
            health,
        )
    }

    #[tokio::test]
    async fn one_way_queries_have_no_return_date() {
        let db = Database::open_in_memory().await.unwrap();
        let scheduler = idle_scheduler(db, airports());

        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let route = Route {
            origin: "JFK".into(),
            destination: "LHR".into(),
        };
        let one_way = scheduler.build_query(&route, 0, today);
        assert_eq!(one_way.departure_date, NaiveDate::from_ymd_opt(2026, 11, 16).unwrap());
        assert!(one_way.return_date.is_none());

        let round_trip = scheduler.build_query(&route, 7, today);
        assert_eq!(round_trip.return_date, NaiveDate::from_ymd_opt(2026, 11, 23));
    }

    #[tokio::test]
    async fn reordered_airports_reset_cursor() {
        let db = Database::open_in_memory().await.unwrap();
        let mut seed = db
            .ensure_sweep_progress(&SweepSettings {
                trip_lengths: vec![7, 14],
                pacing_mode: PacingMode::Fixed,
                target_duration_hours: 1.0,
                min_delay_ms: 0,
                international_only: false,
            })
            .await
            .unwrap();
        let original = WorkQueue::from_airports(&airports(), false, vec![7, 14]);
        seed.total_routes = original.route_count() as i64;
        seed.route_signature = original.signature();
        seed.route_index = 4;
        seed.sweep_number = 2;

        // Same three airports, so the same six routes, in another order.
        let mut reordered = airports();
        reordered.reverse();
        let mut source = MockSource::new();
        source.hang_after = Some(0);
        let h = start(source, reordered, Some(seed)).await;
        h.controller.apply(ControlCommand::Start).await.unwrap();

        let source = Arc::clone(&h.source);
        wait_until(|| {
            let source = Arc::clone(&source);
            async move { !source.calls().is_empty() }
        })
        .await;
        let p = h.db.load_sweep_progress().await.unwrap();
        assert_eq!(p.sweep_number, 2);
        assert_eq!(p.total_routes, 6);
        assert_eq!(p.route_index, 0);
        assert_ne!(p.route_signature, original.signature());
        let first = &h.source.calls()[0];
        assert_eq!((first.origin.as_str(), first.destination.as_str()), ("CDG", "LHR"));
        h.handle.abort();
    }

    #[tokio::test]
    async fn empty_universe_keeps_in_memory_cursor() {
        let db = Database::open_in_memory().await.unwrap();
        let stored = db
            .ensure_sweep_progress(&SweepSettings {
                trip_lengths: vec![7],
                pacing_mode: PacingMode::Fixed,
                target_duration_hours: 1.0,
                min_delay_ms: 0,
                international_only: true,
            })
            .await
            .unwrap();
        let domestic = vec![Airport::new("JFK", "US"), Airport::new("LAX", "US")];
        let mut scheduler = idle_scheduler(db, domestic);

        let mut cursor = stored;
        cursor.total_routes = 2;
        cursor.route_index = 1;
        cursor.queries_completed = 1;
        scheduler.cursor = Some(cursor);

        assert!(scheduler.run_sweep().await.is_err());
        let kept = scheduler.cursor.as_ref().unwrap();
        assert_eq!(kept.route_index, 1);
        assert_eq!(kept.queries_completed, 1);
    }

    #[tokio::test]
    async fn failed_progress_saves_keep_sweeping_from_memory() {
        // A small pacing floor keeps the sweep far from rolling over.
        let settings = SweepSettings {
            trip_lengths: vec![7, 14],
            pacing_mode: PacingMode::Fixed,
            target_duration_hours: 1.0,
            min_delay_ms: 2,
            international_only: false,
        };
        let h = start(MockSource::new(), crate::config::default_airports(), None).await;
        h.db.update_sweep_settings(&settings).await.unwrap();
        h.controller.apply(ControlCommand::Start).await.unwrap();

        let db = h.db.clone();
        wait_until(|| {
            let db = db.clone();
            async move { db.load_sweep_progress().await.unwrap().route_index >= 2 }
        })
        .await;

        // Without the row every save matches nothing.
        sqlx::query("DELETE FROM sweep_progress")
            .execute(h.db.pool())
            .await
            .unwrap();
        let index_at_loss = h.source.calls().len() as i64 / 2;

        let health = Arc::clone(&h.health);
        wait_until(|| {
            let health = Arc::clone(&health);
            async move { health.consecutive_store_failures() >= 2 }
        })
        .await;
        let calls = h.source.calls().len();
        let source = Arc::clone(&h.source);
        wait_until(|| {
            let source = Arc::clone(&source);
            async move { source.calls().len() >= calls + 4 }
        })
        .await;

        // Nothing went back to the start of the sweep while the row was gone.
        let table = crate::config::default_airports();
        let queue = WorkQueue::from_airports(&table, false, vec![7, 14]);
        let first_route = queue.route(0).unwrap();
        let restarted = h.source.calls()[2..].iter().any(|q| {
            q.origin == first_route.origin && q.destination == first_route.destination
        });
        assert!(!restarted);

        h.db.ensure_sweep_progress(&settings).await.unwrap();
        h.controller.apply(ControlCommand::Start).await.unwrap();

        let db = h.db.clone();
        let health = Arc::clone(&h.health);
        wait_until(|| {
            let db = db.clone();
            let health = Arc::clone(&health);
            async move {
                health.consecutive_store_failures() == 0
                    && db.load_sweep_progress().await.unwrap().route_index > index_at_loss
            }
        })
        .await;
        let p = h.db.load_sweep_progress().await.unwrap();
        assert_eq!(p.sweep_number, 1);
        assert_eq!(p.total_routes, queue.route_count() as i64);
        h.handle.abort();
    }
}
