//! Detected deals and the alerts published for them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};

use super::models::{DealAlert, DetectedDeal, NewDeal};
use super::Database;
use crate::error::Result;
use crate::types::{DealClassification, DealStatus};

const DEAL_COLUMNS: &str = "id, deal_fingerprint, origin, destination, departure_date,
    return_date, trip_length, cabin_class, currency, price, baseline_mean, baseline_median,
    discount_percent, deal_score, deal_classification, source_type, first_seen_at,
    last_seen_at, times_seen, status, verified, expires_at";

const ALERT_COLUMNS: &str = "id, deal_id, deal_fingerprint, origin, destination,
    departure_date, price, currency, discount_percent, deal_score, deal_classification,
    publish_method, notification_channels, notification_sent, sent_at, created_at, expires_at";

/// Result of merging one observation into `detected_deals`.
#[derive(Debug, Clone)]
pub struct DealUpsert {
    pub deal: DetectedDeal,
    /// True when this fingerprint had never been seen.
    pub inserted: bool,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DealFilter {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub classification: Option<DealClassification>,
    pub status: Option<DealStatus>,
    pub departure_from: Option<NaiveDate>,
    pub departure_to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Database {
    /// Merge-upsert on the deal fingerprint.
    ///
    /// First sighting inserts with `times_seen = 1` and status `active`. A repeat
    /// keeps `first_seen_at`, bumps `times_seen`, takes the lower price (and the
    /// baseline snapshot, discount and classification that came with it), the
    /// higher score and the later expiry. A repeat of an expired deal revives it;
    /// published and verified deals keep their status.
    ///
    /// One statement; a fresh insert is the row that comes back with
    /// `times_seen = 1`.
    pub async fn upsert_detected_deal(&self, d: &NewDeal) -> Result<DealUpsert> {
        let deal = sqlx::query_as::<_, DetectedDeal>(&format!(
            "INSERT INTO detected_deals (
                deal_fingerprint, origin, destination, departure_date, return_date, trip_length,
                cabin_class, currency, price, baseline_mean, baseline_median, discount_percent,
                deal_score, deal_classification, source_type, first_seen_at, last_seen_at,
                times_seen, status, verified, expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 'active', 0, ?)
             ON CONFLICT(deal_fingerprint) DO UPDATE SET
                last_seen_at = excluded.last_seen_at,
                times_seen = times_seen + 1,
                baseline_mean = CASE WHEN excluded.price < price THEN excluded.baseline_mean ELSE baseline_mean END,
                baseline_median = CASE WHEN excluded.price < price THEN excluded.baseline_median ELSE baseline_median END,
                discount_percent = CASE WHEN excluded.price < price THEN excluded.discount_percent ELSE discount_percent END,
                deal_classification = CASE WHEN excluded.price < price THEN excluded.deal_classification ELSE deal_classification END,
                price = MIN(price, excluded.price),
                deal_score = MAX(deal_score, excluded.deal_score),
                expires_at = MAX(expires_at, excluded.expires_at),
                status = CASE WHEN status = 'expired' THEN 'active' ELSE status END
             RETURNING {DEAL_COLUMNS}"
        ))
        .bind(&d.deal_fingerprint)
        .bind(&d.origin)
        .bind(&d.destination)
        .bind(d.departure_date)
        .bind(d.return_date)
        .bind(d.trip_length)
        .bind(d.cabin_class)
        .bind(&d.currency)
        .bind(d.price)
        .bind(d.baseline_mean)
        .bind(d.baseline_median)
        .bind(d.discount_percent)
        .bind(d.deal_score)
        .bind(d.deal_classification)
        .bind(d.source_type)
        .bind(d.seen_at)
        .bind(d.seen_at)
        .bind(d.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(DealUpsert {
            inserted: deal.times_seen == 1,
            deal,
        })
    }

    pub async fn get_deal(&self, id: i64) -> Result<Option<DetectedDeal>> {
        let deal = sqlx::query_as::<_, DetectedDeal>(&format!(
            "SELECT {DEAL_COLUMNS} FROM detected_deals WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(deal)
    }

    /// Move active deals past their expiry to `expired`. Returns rows changed.
    pub async fn expire_deals(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE detected_deals SET status = 'expired'
             WHERE status = 'active' AND expires_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Published after an alert went out. Verified deals keep their status.
    pub async fn mark_deal_published(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE detected_deals SET status = 'published'
             WHERE id = ? AND status IN ('active', 'expired')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Manual verification workflow.
    pub async fn verify_deal(&self, id: i64) -> Result<Option<DetectedDeal>> {
        let deal = sqlx::query_as::<_, DetectedDeal>(&format!(
            "UPDATE detected_deals SET verified = 1, status = 'verified' WHERE id = ?
             RETURNING {DEAL_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(deal)
    }

    pub async fn list_deals(&self, filter: &DealFilter) -> Result<Vec<DetectedDeal>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {DEAL_COLUMNS} FROM detected_deals WHERE 1 = 1"));
        if let Some(origin) = &filter.origin {
            qb.push(" AND origin = ").push_bind(origin.to_ascii_uppercase());
        }
        if let Some(destination) = &filter.destination {
            qb.push(" AND destination = ").push_bind(destination.to_ascii_uppercase());
        }
        if let Some(classification) = filter.classification {
            qb.push(" AND deal_classification = ").push_bind(classification);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(from) = filter.departure_from {
            qb.push(" AND departure_date >= ").push_bind(from);
        }
        if let Some(to) = filter.departure_to {
            qb.push(" AND departure_date <= ").push_bind(to);
        }
        qb.push(" ORDER BY last_seen_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(100).clamp(1, 1000))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        let deals = qb
            .build_query_as::<DetectedDeal>()
            .fetch_all(&self.pool)
            .await?;
        Ok(deals)
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    /// Strongest classification among alerts for this deal still live at `now`.
    pub async fn best_live_alert_classification(
        &self,
        deal_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<DealClassification>> {
        let classes = sqlx::query_scalar::<_, DealClassification>(
            "SELECT deal_classification FROM deal_alerts WHERE deal_id = ? AND expires_at > ?",
        )
        .bind(deal_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(classes.into_iter().max())
    }

    /// Insert an alert snapshot of `deal`. The sent flag starts unset.
    pub async fn insert_deal_alert(
        &self,
        deal: &DetectedDeal,
        publish_method: &str,
        channels: &[String],
        created_at: DateTime<Utc>,
    ) -> Result<DealAlert> {
        let alert = sqlx::query_as::<_, DealAlert>(&format!(
            "INSERT INTO deal_alerts (
                deal_id, deal_fingerprint, origin, destination, departure_date, price, currency,
                discount_percent, deal_score, deal_classification, publish_method,
                notification_channels, notification_sent, created_at, expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
             RETURNING {ALERT_COLUMNS}"
        ))
        .bind(deal.id)
        .bind(&deal.deal_fingerprint)
        .bind(&deal.origin)
        .bind(&deal.destination)
        .bind(deal.departure_date)
        .bind(deal.price)
        .bind(&deal.currency)
        .bind(deal.discount_percent)
        .bind(deal.deal_score)
        .bind(deal.deal_classification)
        .bind(publish_method)
        .bind(Json(channels))
        .bind(created_at)
        .bind(deal.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(alert)
    }

    pub async fn mark_alert_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE deal_alerts SET notification_sent = 1, sent_at = ? WHERE id = ?")
            .bind(sent_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_alerts(
        &self,
        unsent_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DealAlert>> {
        let alerts = sqlx::query_as::<_, DealAlert>(&format!(
            "SELECT {ALERT_COLUMNS} FROM deal_alerts
             WHERE (? = 0 OR notification_sent = 0)
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(unsent_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }
}
