use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::db::models::DealAlert;
use crate::db::Database;
use crate::error::Result;
use crate::types::utc_now;

const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Receives published alerts and delivers them.
/// Runs as a dedicated background task, never blocks the sweep path.
pub struct Notifier {
    db: Database,
    alert_rx: mpsc::Receiver<DealAlert>,
    client: reqwest::Client,
    webhook_url: Option<String>,
    health: Arc<HealthState>,
}

impl Notifier {
    pub fn new(
        db: Database,
        alert_rx: mpsc::Receiver<DealAlert>,
        webhook_url: Option<String>,
        health: Arc<HealthState>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            db,
            alert_rx,
            client,
            webhook_url,
            health,
        })
    }

    pub async fn run(mut self) {
        while let Some(alert) = self.alert_rx.recv().await {
            self.health.dec_pending_notifications();
            if let Err(e) = self.deliver(&alert).await {
                error!("Alert {} delivery failed: {e}", alert.id);
            }
        }
    }

    /// Log, POST to the webhook if one is configured, then mark the alert sent.
    /// A failed POST leaves the alert unsent.
    async fn deliver(&self, alert: &DealAlert) -> Result<()> {
        info!(
            event = "NOTIFY",
            alert_id = alert.id,
            deal_id = alert.deal_id,
            channels = ?alert.notification_channels,
            "[NOTIFY] {}-{} on {} | {:.2} {} | {} | -{:.1}%",
            alert.origin,
            alert.destination,
            alert.departure_date,
            alert.price,
            alert.currency,
            alert.deal_classification,
            alert.discount_percent,
        );

        if let Some(url) = &self.webhook_url {
            let resp = self.client.post(url).json(alert).send().await?;
            if !resp.status().is_success() {
                warn!(
                    "Webhook returned HTTP {} for alert {}, leaving it unsent",
                    resp.status(),
                    alert.id
                );
                return Ok(());
            }
        }

        self.db.mark_alert_sent(alert.id, utc_now()).await
    }
}
