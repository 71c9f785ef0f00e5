//! SQLite storage for the sweep cursor, price samples, baselines, deals and alerts.
//!
//! Operations are split by concern, all as methods on [`Database`]:
//!
//! - [`progress`]: singleton sweep progress row, control flags, sweep history
//! - [`samples`]: price sample upserts, windowed reads, route baselines
//! - [`deals`]: deal merge-upsert, expiry, verification, alerts
//!
//! The progress row is written through three separate statements (progress
//! save, control flags, settings), each naming only its own columns.

pub mod models;
mod deals;
mod progress;
mod samples;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;

pub use deals::{DealFilter, DealUpsert};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and run embedded migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        info!("Database ready at {path}");
        Ok(db)
    }

    /// Private in-memory database on a single pinned connection (tests, dry runs).
    pub async fn open_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
