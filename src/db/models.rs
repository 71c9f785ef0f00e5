//! Row types for the tables in `migrations/0001_init.sql`.
//! Used by sqlx for typed queries and serialized as-is by the HTTP API.
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::types::{
    CabinClass, ControlFlags, DealClassification, DealStatus, PacingMode, SourceType,
    SweepSettings,
};

/// The singleton scheduler cursor (id = 1).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SweepProgress {
    pub sweep_number: i64,
    pub route_index: i64,
    pub total_routes: i64,
    /// Digest of the ordered route list `route_index` points into. Empty
    /// until the scheduler first runs.
    pub route_signature: String,
    pub current_origin: Option<String>,
    pub current_destination: Option<String>,
    /// Successful queries in the current sweep.
    pub queries_completed: i64,
    /// Failed queries in the current sweep.
    pub errors_count: i64,
    pub last_error: Option<String>,
    /// Sum of pacing delays applied in the current sweep.
    pub total_delay_ms: i64,
    pub sweep_started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[sqlx(json)]
    pub trip_lengths: Vec<i64>,
    pub pacing_mode: PacingMode,
    pub target_duration_hours: f64,
    pub min_delay_ms: i64,
    pub is_running: bool,
    pub is_paused: bool,
    pub international_only: bool,
}

impl SweepProgress {
    pub fn control_flags(&self) -> ControlFlags {
        ControlFlags {
            is_running: self.is_running,
            is_paused: self.is_paused,
        }
    }

    pub fn settings(&self) -> SweepSettings {
        SweepSettings {
            trip_lengths: self.trip_lengths.clone(),
            pacing_mode: self.pacing_mode,
            target_duration_hours: self.target_duration_hours,
            min_delay_ms: self.min_delay_ms,
            international_only: self.international_only,
        }
    }

    /// Work items attempted so far in this sweep, successful or not.
    pub fn attempted(&self) -> i64 {
        self.queries_completed + self.errors_count
    }

    pub fn total_work(&self) -> i64 {
        self.total_routes * self.trip_lengths.len() as i64
    }
}

/// One completed sweep. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SweepStats {
    pub id: i64,
    pub sweep_number: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_routes: i64,
    pub successful_queries: i64,
    pub failed_queries: i64,
    pub total_duration_seconds: i64,
    pub avg_delay_ms: f64,
    pub min_price_found: Option<f64>,
    pub max_price_found: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSweepStats {
    pub sweep_number: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_routes: i64,
    pub successful_queries: i64,
    pub failed_queries: i64,
    pub total_duration_seconds: i64,
    pub avg_delay_ms: f64,
    pub min_price_found: Option<f64>,
    pub max_price_found: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RouteBaseline {
    pub origin: String,
    pub destination: String,
    pub trip_length: i64,
    pub cabin_class: CabinClass,
    pub currency: String,
    pub sample_count: i64,
    pub mean_price: f64,
    pub median_price: f64,
    pub stddev_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub p10_price: f64,
    pub p25_price: f64,
    pub p75_price: f64,
    pub p90_price: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DetectedDeal {
    pub id: i64,
    pub deal_fingerprint: String,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub trip_length: i64,
    pub cabin_class: CabinClass,
    pub currency: String,
    pub price: f64,
    pub baseline_mean: f64,
    pub baseline_median: f64,
    pub discount_percent: f64,
    pub deal_score: f64,
    pub deal_classification: DealClassification,
    pub source_type: SourceType,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub times_seen: i64,
    pub status: DealStatus,
    pub verified: bool,
    pub expires_at: DateTime<Utc>,
}

/// A classified observation about to be merged into `detected_deals`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeal {
    pub deal_fingerprint: String,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub trip_length: i64,
    pub cabin_class: CabinClass,
    pub currency: String,
    pub price: f64,
    pub baseline_mean: f64,
    pub baseline_median: f64,
    pub discount_percent: f64,
    pub deal_score: f64,
    pub deal_classification: DealClassification,
    pub source_type: SourceType,
    pub seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DealAlert {
    pub id: i64,
    pub deal_id: i64,
    pub deal_fingerprint: String,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub price: f64,
    pub currency: String,
    pub discount_percent: f64,
    pub deal_score: f64,
    pub deal_classification: DealClassification,
    pub publish_method: String,
    #[sqlx(json)]
    pub notification_channels: Vec<String>,
    pub notification_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// The alert counts as live until this instant.
    pub expires_at: DateTime<Utc>,
}
