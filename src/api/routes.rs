use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::models::{DealAlert, DetectedDeal, SweepStats};
use crate::db::{Database, DealFilter};
use crate::detector::{DealPipeline, PipelineOutcome};
use crate::error::AppError;
use crate::sweep::{SweepController, SweepStatus};
use crate::types::{
    utc_now, CabinClass, ControlCommand, ControlFlags, PriceSample, SchedulerState, SourceType,
    SweepSettings,
};

#[derive(Clone)]
pub struct ApiState {
    pub db: Database,
    pub controller: SweepController,
    pub pipeline: Arc<DealPipeline>,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
    /// Fallbacks for manually submitted samples.
    pub currency: String,
    pub cabin_class: CabinClass,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/sweep/status", get(get_sweep_status))
        .route("/sweep/start", post(start_sweep))
        .route("/sweep/stop", post(stop_sweep))
        .route("/sweep/pause", post(pause_sweep))
        .route("/sweep/resume", post(resume_sweep))
        .route("/sweep/settings", put(put_sweep_settings))
        .route("/sweep/history", get(get_sweep_history))
        .route("/deals", get(get_deals))
        .route("/deals/:id", get(get_deal))
        .route("/deals/:id/verify", post(verify_deal))
        .route("/alerts", get(get_alerts))
        .route("/samples", post(post_sample))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param / body structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct AlertsQuery {
    pub unsent_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A price observed outside the sweep (social post, partner webhook, operator).
#[derive(Debug, Deserialize)]
pub struct ManualSample {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub price: f64,
    pub currency: Option<String>,
    pub cabin_class: Option<CabinClass>,
    pub passengers: Option<i64>,
    pub stops: Option<i64>,
    pub distance_miles: Option<f64>,
    pub cost_per_mile: Option<f64>,
    pub source_type: Option<SourceType>,
    pub raw_offer: Option<serde_json::Value>,
}

impl ManualSample {
    pub fn into_sample(
        self,
        default_currency: &str,
        default_cabin: CabinClass,
        queried_at: DateTime<Utc>,
    ) -> Result<PriceSample, AppError> {
        let origin = airport_code(&self.origin)?;
        let destination = airport_code(&self.destination)?;
        if origin == destination {
            return Err(AppError::BadRequest("origin and destination are the same".into()));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(AppError::BadRequest("price must be positive".into()));
        }
        let trip_length = match self.return_date {
            Some(ret) if ret < self.departure_date => {
                return Err(AppError::BadRequest("return date precedes departure".into()));
            }
            Some(ret) => (ret - self.departure_date).num_days(),
            None => 0,
        };
        let cost_per_mile = self.cost_per_mile.or_else(|| {
            self.distance_miles
                .filter(|d| *d > 0.0)
                .map(|d| self.price / d)
        });

        Ok(PriceSample {
            origin,
            destination,
            departure_date: self.departure_date,
            return_date: self.return_date,
            trip_length,
            cabin_class: self.cabin_class.unwrap_or(default_cabin),
            currency: self
                .currency
                .unwrap_or_else(|| default_currency.to_string())
                .to_ascii_uppercase(),
            price: self.price,
            passengers: self.passengers.unwrap_or(1).max(1),
            stops: self.stops,
            distance_miles: self.distance_miles,
            cost_per_mile,
            raw_offer: self.raw_offer,
            source_type: self.source_type.unwrap_or(SourceType::Manual),
            queried_at,
        })
    }
}

fn airport_code(raw: &str) -> Result<String, AppError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(AppError::BadRequest(format!("'{raw}' is not an airport code")))
    }
}

fn validate_settings(s: &SweepSettings) -> Result<(), AppError> {
    if s.trip_lengths.is_empty() {
        return Err(AppError::BadRequest("trip_lengths must not be empty".into()));
    }
    if s.trip_lengths.iter().any(|t| *t < 0) {
        return Err(AppError::BadRequest("trip lengths must be >= 0".into()));
    }
    if !s.target_duration_hours.is_finite() || s.target_duration_hours <= 0.0 {
        return Err(AppError::BadRequest("target_duration_hours must be positive".into()));
    }
    if s.min_delay_ms < 0 {
        return Err(AppError::BadRequest("min_delay_ms must be >= 0".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub state: SchedulerState,
    pub last_query_at: Option<DateTime<Utc>>,
    pub consecutive_store_failures: u64,
    pub pending_notifications: u64,
    pub provider_queries_timed: u64,
}

#[derive(Serialize)]
pub struct ControlResponse {
    pub state: SchedulerState,
    pub flags: ControlFlags,
}

#[derive(Serialize)]
pub struct SampleResponse {
    pub outcome: &'static str,
    pub discount_percent: Option<f64>,
    pub deal: Option<DetectedDeal>,
    pub alert: Option<DealAlert>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let failures = state.health.consecutive_store_failures();
    Json(HealthResponse {
        status: if failures == 0 { "ok" } else { "degraded" },
        state: SchedulerState::from_flags(state.controller.current()),
        last_query_at: state.health.last_query_at(),
        consecutive_store_failures: failures,
        pending_notifications: state.health.pending_notifications(),
        provider_queries_timed: state.latency.len(),
    })
}

async fn get_sweep_status(State(state): State<ApiState>) -> Result<Json<SweepStatus>, AppError> {
    let progress = state.db.load_sweep_progress().await?;
    Ok(Json(SweepStatus::derive(
        progress,
        utc_now(),
        &state.latency,
        &state.health,
    )))
}

async fn control(state: &ApiState, cmd: ControlCommand) -> Result<Json<ControlResponse>, AppError> {
    let flags = state.controller.apply(cmd).await?;
    Ok(Json(ControlResponse {
        state: SchedulerState::from_flags(flags),
        flags,
    }))
}

async fn start_sweep(State(state): State<ApiState>) -> Result<Json<ControlResponse>, AppError> {
    control(&state, ControlCommand::Start).await
}

async fn stop_sweep(State(state): State<ApiState>) -> Result<Json<ControlResponse>, AppError> {
    control(&state, ControlCommand::Stop).await
}

async fn pause_sweep(State(state): State<ApiState>) -> Result<Json<ControlResponse>, AppError> {
    control(&state, ControlCommand::Pause).await
}

async fn resume_sweep(State(state): State<ApiState>) -> Result<Json<ControlResponse>, AppError> {
    control(&state, ControlCommand::Resume).await
}

/// Stored immediately; the scheduler applies it on its next (re)start.
async fn put_sweep_settings(
    State(state): State<ApiState>,
    Json(settings): Json<SweepSettings>,
) -> Result<Json<SweepSettings>, AppError> {
    validate_settings(&settings)?;
    state.db.update_sweep_settings(&settings).await?;
    let progress = state.db.load_sweep_progress().await?;
    Ok(Json(progress.settings()))
}

async fn get_sweep_history(
    State(state): State<ApiState>,
    Query(params): Query<PageQuery>,
) -> Result<Json<Vec<SweepStats>>, AppError> {
    let limit = params.limit.unwrap_or(30).clamp(1, 500);
    let offset = params.offset.unwrap_or(0).max(0);
    Ok(Json(state.db.sweep_history(limit, offset).await?))
}

async fn get_deals(
    State(state): State<ApiState>,
    Query(filter): Query<DealFilter>,
) -> Result<Json<Vec<DetectedDeal>>, AppError> {
    Ok(Json(state.db.list_deals(&filter).await?))
}

async fn get_deal(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<DetectedDeal>, AppError> {
    state
        .db
        .get_deal(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("deal {id}")))
}

async fn verify_deal(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<DetectedDeal>, AppError> {
    state
        .db
        .verify_deal(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("deal {id}")))
}

async fn get_alerts(
    State(state): State<ApiState>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<Vec<DealAlert>>, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let offset = params.offset.unwrap_or(0).max(0);
    let alerts = state
        .db
        .list_alerts(params.unsent_only.unwrap_or(false), limit, offset)
        .await?;
    Ok(Json(alerts))
}

async fn post_sample(
    State(state): State<ApiState>,
    Json(body): Json<ManualSample>,
) -> Result<Json<SampleResponse>, AppError> {
    let sample = body.into_sample(&state.currency, state.cabin_class, utc_now())?;
    let response = match state.pipeline.process(&sample).await? {
        PipelineOutcome::NoBaseline => SampleResponse {
            outcome: "no_baseline",
            discount_percent: None,
            deal: None,
            alert: None,
        },
        PipelineOutcome::NotADeal { discount_percent } => SampleResponse {
            outcome: "not_a_deal",
            discount_percent: Some(discount_percent),
            deal: None,
            alert: None,
        },
        PipelineOutcome::Deal { upsert, alert } => SampleResponse {
            outcome: "deal",
            discount_percent: Some(upsert.deal.discount_percent),
            deal: Some(upsert.deal),
            alert,
        },
    };
    Ok(Json(response))
}
