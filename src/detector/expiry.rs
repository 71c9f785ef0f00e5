use std::time::Duration;
use tracing::{error, info};

use crate::config::EXPIRY_INTERVAL_SECS;
use crate::db::Database;
use crate::error::Result;
use crate::types::utc_now;

/// Background task that moves active deals past their expiry to `expired`.
/// Published and verified deals are never touched.
pub struct DealExpirer {
    db: Database,
    interval: Duration,
}

impl DealExpirer {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            interval: Duration::from_secs(EXPIRY_INTERVAL_SECS),
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.expire_once().await {
                error!("Deal expiry error: {e}");
            }
        }
    }

    pub async fn expire_once(&self) -> Result<u64> {
        let expired = self.db.expire_deals(utc_now()).await?;
        if expired > 0 {
            info!(event = "DEALS_EXPIRED", count = expired, "[EXPIRY] {expired} deals expired");
        }
        Ok(expired)
    }
}
