//! Sweep progress, control flags and sweep history.
//!
//! The singleton row has three independent writers:
//!
//! - `save_sweep_progress`: cursor and counters, called by the scheduler after every route
//! - `apply_control_command`: `is_running` / `is_paused`, called by operators
//! - `update_sweep_settings`: trip lengths and pacing, called by operators
//!
//! Each statement names only its own columns, so a progress save racing a
//! stop request can never resurrect `is_running`.

use chrono::{DateTime, Utc};
use sqlx::types::Json;

use super::models::{NewSweepStats, SweepProgress, SweepStats};
use super::Database;
use crate::error::{AppError, Result};
use crate::types::{utc_now, ControlCommand, ControlFlags, SweepSettings};

const PROGRESS_COLUMNS: &str = "sweep_number, route_index, total_routes, route_signature, current_origin,
    current_destination, queries_completed, errors_count, last_error, total_delay_ms,
    sweep_started_at, last_updated_at, trip_lengths, pacing_mode, target_duration_hours,
    min_delay_ms, is_running, is_paused, international_only";

impl Database {
    /// Create the singleton row from `defaults` on first boot, then return the stored row.
    /// An existing row is never modified.
    pub async fn ensure_sweep_progress(&self, defaults: &SweepSettings) -> Result<SweepProgress> {
        let now = utc_now();
        sqlx::query(
            "INSERT OR IGNORE INTO sweep_progress (
                id, sweep_number, route_index, total_routes, sweep_started_at, last_updated_at,
                trip_lengths, pacing_mode, target_duration_hours, min_delay_ms,
                is_running, is_paused, international_only
             ) VALUES (1, 1, 0, 0, ?, ?, ?, ?, ?, ?, 0, 0, ?)",
        )
        .bind(now)
        .bind(now)
        .bind(Json(&defaults.trip_lengths))
        .bind(defaults.pacing_mode)
        .bind(defaults.target_duration_hours)
        .bind(defaults.min_delay_ms)
        .bind(defaults.international_only)
        .execute(&self.pool)
        .await?;

        self.load_sweep_progress().await
    }

    pub async fn load_sweep_progress(&self) -> Result<SweepProgress> {
        sqlx::query_as::<_, SweepProgress>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM sweep_progress WHERE id = 1"
        ))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("sweep progress row".to_string()))
    }

    /// Persist cursor and counters. Control flags and settings are not written.
    pub async fn save_sweep_progress(&self, p: &SweepProgress) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sweep_progress SET
                sweep_number = ?,
                route_index = ?,
                total_routes = ?,
                route_signature = ?,
                current_origin = ?,
                current_destination = ?,
                queries_completed = ?,
                errors_count = ?,
                last_error = ?,
                total_delay_ms = ?,
                sweep_started_at = ?,
                last_updated_at = ?
             WHERE id = 1",
        )
        .bind(p.sweep_number)
        .bind(p.route_index)
        .bind(p.total_routes)
        .bind(&p.route_signature)
        .bind(&p.current_origin)
        .bind(&p.current_destination)
        .bind(p.queries_completed)
        .bind(p.errors_count)
        .bind(&p.last_error)
        .bind(p.total_delay_ms)
        .bind(p.sweep_started_at)
        .bind(p.last_updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("sweep progress row".to_string()));
        }
        Ok(())
    }

    pub async fn load_control_flags(&self) -> Result<ControlFlags> {
        sqlx::query_as::<_, ControlFlags>(
            "SELECT is_running, is_paused FROM sweep_progress WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("sweep progress row".to_string()))
    }

    /// The control path: the only writer of `is_running` and `is_paused`.
    pub async fn apply_control_command(&self, cmd: ControlCommand) -> Result<ControlFlags> {
        let sql = match cmd {
            ControlCommand::Start => {
                "UPDATE sweep_progress SET is_running = 1, is_paused = 0 WHERE id = 1
                 RETURNING is_running, is_paused"
            }
            ControlCommand::Stop => {
                "UPDATE sweep_progress SET is_running = 0, is_paused = 0 WHERE id = 1
                 RETURNING is_running, is_paused"
            }
            ControlCommand::Pause => {
                "UPDATE sweep_progress SET is_paused = 1 WHERE id = 1
                 RETURNING is_running, is_paused"
            }
            ControlCommand::Resume => {
                "UPDATE sweep_progress SET is_paused = 0 WHERE id = 1
                 RETURNING is_running, is_paused"
            }
        };
        sqlx::query_as::<_, ControlFlags>(sql)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("sweep progress row".to_string()))
    }

    /// Operator settings. Picked up by the scheduler on its next (re)start.
    pub async fn update_sweep_settings(&self, s: &SweepSettings) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sweep_progress SET
                trip_lengths = ?,
                pacing_mode = ?,
                target_duration_hours = ?,
                min_delay_ms = ?,
                international_only = ?
             WHERE id = 1",
        )
        .bind(Json(&s.trip_lengths))
        .bind(s.pacing_mode)
        .bind(s.target_duration_hours)
        .bind(s.min_delay_ms)
        .bind(s.international_only)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("sweep progress row".to_string()));
        }
        Ok(())
    }

    /// Append a completed sweep. Returns false if this sweep number was already
    /// recorded (a crash between the append and the next cursor save replays
    /// the final route and completes the same sweep twice).
    pub async fn append_sweep_stats(&self, s: &NewSweepStats) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO sweep_stats (
                sweep_number, started_at, completed_at, total_routes, successful_queries,
                failed_queries, total_duration_seconds, avg_delay_ms, min_price_found,
                max_price_found
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(sweep_number) DO NOTHING",
        )
        .bind(s.sweep_number)
        .bind(s.started_at)
        .bind(s.completed_at)
        .bind(s.total_routes)
        .bind(s.successful_queries)
        .bind(s.failed_queries)
        .bind(s.total_duration_seconds)
        .bind(s.avg_delay_ms)
        .bind(s.min_price_found)
        .bind(s.max_price_found)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recent sweeps first.
    pub async fn sweep_history(&self, limit: i64, offset: i64) -> Result<Vec<SweepStats>> {
        let rows = sqlx::query_as::<_, SweepStats>(
            "SELECT id, sweep_number, started_at, completed_at, total_routes, successful_queries,
                    failed_queries, total_duration_seconds, avg_delay_ms, min_price_found,
                    max_price_found
             FROM sweep_stats
             ORDER BY sweep_number DESC
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Cheapest and dearest sweep-sourced price recorded since `since`.
    pub async fn sweep_price_range(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(Option<f64>, Option<f64>)> {
        let range = sqlx::query_as::<_, (Option<f64>, Option<f64>)>(
            "SELECT MIN(price), MAX(price) FROM price_samples
             WHERE source_type = 'sweep' AND queried_at >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PacingMode;

    fn defaults() -> SweepSettings {
        SweepSettings {
            trip_lengths: vec![7, 14],
            pacing_mode: PacingMode::Adaptive,
            target_duration_hours: 24.0,
            min_delay_ms: 1000,
            international_only: false,
        }
    }

    #[tokio::test]
    async fn first_boot_creates_idle_row() {
        let db = Database::open_in_memory().await.unwrap();
        let p = db.ensure_sweep_progress(&defaults()).await.unwrap();
        assert_eq!(p.sweep_number, 1);
        assert_eq!(p.route_index, 0);
        assert_eq!(p.trip_lengths, vec![7, 14]);
        assert_eq!(p.pacing_mode, PacingMode::Adaptive);
        assert!(!p.is_running);
        assert!(!p.is_paused);
    }

    #[tokio::test]
    async fn existing_row_survives_second_boot() {
        let db = Database::open_in_memory().await.unwrap();
        let mut p = db.ensure_sweep_progress(&defaults()).await.unwrap();
        p.total_routes = 8930;
        p.route_index = 500;
        p.sweep_number = 3;
        db.save_sweep_progress(&p).await.unwrap();

        let mut other = defaults();
        other.trip_lengths = vec![3];
        let reloaded = db.ensure_sweep_progress(&other).await.unwrap();
        assert_eq!(reloaded.sweep_number, 3);
        assert_eq!(reloaded.route_index, 500);
        assert_eq!(reloaded.trip_lengths, vec![7, 14]);
    }

    #[tokio::test]
    async fn progress_save_leaves_control_flags_alone() {
        let db = Database::open_in_memory().await.unwrap();
        db.ensure_sweep_progress(&defaults()).await.unwrap();
        db.apply_control_command(ControlCommand::Start).await.unwrap();

        // Scheduler holds a stale in-memory copy from before the pause.
        let mut stale = db.load_sweep_progress().await.unwrap();
        assert!(!stale.is_paused);

        db.apply_control_command(ControlCommand::Pause).await.unwrap();

        stale.total_routes = 10;
        stale.route_index = 4;
        stale.is_paused = false;
        stale.is_running = false;
        db.save_sweep_progress(&stale).await.unwrap();

        let flags = db.load_control_flags().await.unwrap();
        assert!(flags.is_paused);
        assert!(flags.is_running);
        assert_eq!(db.load_sweep_progress().await.unwrap().route_index, 4);
    }

    #[tokio::test]
    async fn control_commands_map_to_flags() {
        let db = Database::open_in_memory().await.unwrap();
        db.ensure_sweep_progress(&defaults()).await.unwrap();

        let f = db.apply_control_command(ControlCommand::Start).await.unwrap();
        assert_eq!(f, ControlFlags { is_running: true, is_paused: false });
        let f = db.apply_control_command(ControlCommand::Pause).await.unwrap();
        assert_eq!(f, ControlFlags { is_running: true, is_paused: true });
        let f = db.apply_control_command(ControlCommand::Resume).await.unwrap();
        assert_eq!(f, ControlFlags { is_running: true, is_paused: false });
        db.apply_control_command(ControlCommand::Pause).await.unwrap();
        let f = db.apply_control_command(ControlCommand::Stop).await.unwrap();
        assert_eq!(f, ControlFlags { is_running: false, is_paused: false });
    }

    #[tokio::test]
    async fn settings_update_does_not_move_cursor() {
        let db = Database::open_in_memory().await.unwrap();
        let mut p = db.ensure_sweep_progress(&defaults()).await.unwrap();
        p.total_routes = 100;
        p.route_index = 42;
        db.save_sweep_progress(&p).await.unwrap();

        let mut s = defaults();
        s.pacing_mode = PacingMode::Fixed;
        s.trip_lengths = vec![0];
        db.update_sweep_settings(&s).await.unwrap();

        let reloaded = db.load_sweep_progress().await.unwrap();
        assert_eq!(reloaded.route_index, 42);
        assert_eq!(reloaded.pacing_mode, PacingMode::Fixed);
        assert_eq!(reloaded.trip_lengths, vec![0]);
    }

    #[tokio::test]
    async fn duplicate_sweep_completion_is_ignored() {
        let db = Database::open_in_memory().await.unwrap();
        let now = utc_now();
        let stats = NewSweepStats {
            sweep_number: 1,
            started_at: now,
            completed_at: now,
            total_routes: 6,
            successful_queries: 5,
            failed_queries: 1,
            total_duration_seconds: 0,
            avg_delay_ms: 10.0,
            min_price_found: Some(99.0),
            max_price_found: Some(450.0),
        };
        assert!(db.append_sweep_stats(&stats).await.unwrap());
        assert!(!db.append_sweep_stats(&stats).await.unwrap());

        let history = db.sweep_history(10, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].failed_queries, 1);
        assert_eq!(history[0].min_price_found, Some(99.0));
    }
}
