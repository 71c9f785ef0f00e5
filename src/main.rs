use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fare_sweeper::alerts::{AlertPolicy, AlertPublisher, Notifier};
use fare_sweeper::api::health::HealthState;
use fare_sweeper::api::latency::LatencyStats;
use fare_sweeper::api::{router, ApiState};
use fare_sweeper::config::{Config, CHANNEL_CAPACITY};
use fare_sweeper::db::models::DealAlert;
use fare_sweeper::db::Database;
use fare_sweeper::detector::{BaselineEngine, DealExpirer, DealPipeline};
use fare_sweeper::error::Result;
use fare_sweeper::provider::{HttpPriceSource, PriceSource};
use fare_sweeper::sweep::{SchedulerConfig, SweepController, SweepScheduler};
use fare_sweeper::types::{ControlCommand, SchedulerState};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let db = Database::open(&cfg.db_path).await?;
    let progress = db.ensure_sweep_progress(&cfg.sweep_defaults).await?;
    info!(
        "[SWEEP] sweep {} at route {}/{} ({:?}) | trip lengths {:?} | {} pacing, target {}h, floor {}ms",
        progress.sweep_number,
        progress.route_index,
        progress.total_routes,
        SchedulerState::from_flags(progress.control_flags()),
        progress.trip_lengths,
        progress.pacing_mode,
        progress.target_duration_hours,
        progress.min_delay_ms,
    );
    if progress.settings() != cfg.sweep_defaults {
        info!("[SWEEP] stored sweep settings differ from environment seeds; stored settings win");
    }
    info!(
        "Route universe: {} airports, provider at {}",
        cfg.airports.len(),
        cfg.provider_url
    );

    // --- Shared state ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Channels ---
    let (alert_tx, alert_rx) = mpsc::channel::<DealAlert>(CHANNEL_CAPACITY);

    // --- Detection pipeline ---
    let publisher = AlertPublisher::new(
        db.clone(),
        AlertPolicy::from_config(&cfg),
        Some(alert_tx),
        Arc::clone(&health),
    );
    let baselines = BaselineEngine::new(db.clone(), cfg.baseline_window_days, cfg.baseline_min_samples);
    let pipeline = Arc::new(DealPipeline::new(
        db.clone(),
        baselines,
        publisher,
        cfg.deal_ttl_hours,
    ));

    // --- Spawn tasks ---

    // Alert notifier
    if cfg.alert_webhook_url.is_none() {
        warn!("ALERT_WEBHOOK_URL not set, alerts are only logged");
    }
    let notifier = Notifier::new(
        db.clone(),
        alert_rx,
        cfg.alert_webhook_url.clone(),
        Arc::clone(&health),
    )?;
    tokio::spawn(async move { notifier.run().await });

    // Deal expiry (background, every EXPIRY_INTERVAL_SECS)
    let expirer = DealExpirer::new(db.clone());
    tokio::spawn(async move { expirer.run().await });

    // Sweep scheduler
    let (controller, flags_rx) = SweepController::new(db.clone(), progress.control_flags());
    let source: Arc<dyn PriceSource> = Arc::new(
        HttpPriceSource::new(
            &cfg.provider_url,
            cfg.provider_api_key.clone(),
            cfg.provider_timeout_secs,
        )?,
    );
    let scheduler = SweepScheduler::new(
        db.clone(),
        source,
        Arc::clone(&pipeline),
        SchedulerConfig::from_config(&cfg),
        flags_rx,
        Arc::clone(&latency),
        Arc::clone(&health),
    );
    tokio::spawn(async move { scheduler.run().await });

    if cfg.autostart && !progress.is_running {
        controller.apply(ControlCommand::Start).await?;
    }

    // HTTP API server
    let api_state = ApiState {
        db,
        controller,
        pipeline,
        latency,
        health,
        currency: cfg.currency.clone(),
        cabin_class: cfg.cabin_class,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
