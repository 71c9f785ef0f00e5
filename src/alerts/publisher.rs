use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::config::Config;
use crate::db::models::{DealAlert, DetectedDeal};
use crate::db::Database;
use crate::error::Result;
use crate::types::DealClassification;

const PUBLISH_METHOD: &str = "auto";

#[derive(Debug, Clone, PartialEq)]
pub struct AlertPolicy {
    pub min_classification: DealClassification,
    pub min_score: f64,
    /// Publish again while an alert is live if the deal's classification has
    /// risen above everything already alerted.
    pub republish_on_upgrade: bool,
    pub channels: Vec<String>,
}

impl AlertPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            min_classification: cfg.alert_min_classification,
            min_score: cfg.alert_min_score,
            republish_on_upgrade: cfg.alert_republish_on_upgrade,
            channels: cfg.alert_channels.clone(),
        }
    }

    /// Threshold check only; says nothing about existing alerts.
    pub fn qualifies(&self, deal: &DetectedDeal) -> bool {
        deal.deal_classification >= self.min_classification && deal.deal_score >= self.min_score
    }

    /// Decide given the strongest classification among live alerts for the deal.
    pub fn should_publish(
        &self,
        deal: &DetectedDeal,
        best_live: Option<DealClassification>,
    ) -> bool {
        if !self.qualifies(deal) {
            return false;
        }
        match best_live {
            None => true,
            Some(best) => self.republish_on_upgrade && deal.deal_classification > best,
        }
    }
}

/// Turns qualifying deals into `DealAlert` rows and hands them to the notifier.
pub struct AlertPublisher {
    db: Database,
    policy: AlertPolicy,
    alert_tx: Option<mpsc::Sender<DealAlert>>,
    health: Arc<HealthState>,
    /// Held from the live-alert lookup through the insert.
    publish_lock: Mutex<()>,
}

impl AlertPublisher {
    pub fn new(
        db: Database,
        policy: AlertPolicy,
        alert_tx: Option<mpsc::Sender<DealAlert>>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            db,
            policy,
            alert_tx,
            health,
            publish_lock: Mutex::new(()),
        }
    }

    /// Publish an alert for `deal` if the policy allows it. Re-sighting a deal
    /// that already has a live alert never publishes on its own.
    pub async fn consider(
        &self,
        deal: &DetectedDeal,
        now: DateTime<Utc>,
    ) -> Result<Option<DealAlert>> {
        if !self.policy.qualifies(deal) {
            return Ok(None);
        }
        let _guard = self.publish_lock.lock().await;
        let best_live = self.db.best_live_alert_classification(deal.id, now).await?;
        if !self.policy.should_publish(deal, best_live) {
            return Ok(None);
        }

        let alert = self
            .db
            .insert_deal_alert(deal, PUBLISH_METHOD, &self.policy.channels, now)
            .await?;
        self.db.mark_deal_published(deal.id).await?;

        info!(
            event = "DEAL_ALERT",
            alert_id = alert.id,
            deal_id = deal.id,
            route = %format!("{}-{}", deal.origin, deal.destination),
            classification = %deal.deal_classification,
            upgrade = best_live.is_some(),
            "[ALERT] {}-{} {} | {:.2} {} | -{:.1}% | score {:.1}",
            deal.origin,
            deal.destination,
            deal.deal_classification,
            deal.price,
            deal.currency,
            deal.discount_percent,
            deal.deal_score,
        );

        if let Some(tx) = &self.alert_tx {
            match tx.try_send(alert.clone()) {
                Ok(()) => self.health.inc_pending_notifications(),
                Err(e) => warn!("Notifier channel unavailable, alert {} left unsent: {e}", alert.id),
            }
        }

        Ok(Some(alert))
    }
}
