use chrono::Duration;
use tracing::{debug, info};

use crate::alerts::AlertPublisher;
use crate::db::models::{DealAlert, NewDeal};
use crate::db::{Database, DealUpsert};
use crate::detector::baseline::BaselineEngine;
use crate::detector::classifier;
use crate::error::Result;
use crate::types::{utc_now, BaselineKey, PriceSample};

/// What happened to one sample on its way through the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Stored; no usable baseline for its key yet.
    NoBaseline,
    /// Stored; priced within normal range.
    NotADeal { discount_percent: f64 },
    /// Stored and merged into a deal.
    Deal {
        upsert: Box<DealUpsert>,
        alert: Option<DealAlert>,
    },
}

/// Sample → baseline → classifier → deduplicator → publisher.
pub struct DealPipeline {
    db: Database,
    baselines: BaselineEngine,
    publisher: AlertPublisher,
    deal_ttl: Duration,
}

impl DealPipeline {
    pub fn new(
        db: Database,
        baselines: BaselineEngine,
        publisher: AlertPublisher,
        deal_ttl_hours: i64,
    ) -> Self {
        Self {
            db,
            baselines,
            publisher,
            deal_ttl: Duration::hours(deal_ttl_hours.max(1)),
        }
    }

    pub async fn process(&self, sample: &PriceSample) -> Result<PipelineOutcome> {
        self.db.upsert_price_sample(sample).await?;

        let now = utc_now();
        let key = BaselineKey::for_sample(sample);
        let Some(baseline) = self.baselines.recompute(&key, now).await? else {
            debug!(key = %key, "no usable baseline, skipping classification");
            return Ok(PipelineOutcome::NoBaseline);
        };

        let Some(discount) = classifier::discount_percent(baseline.mean_price, sample.price) else {
            return Ok(PipelineOutcome::NoBaseline);
        };
        let Some(classification) = classifier::classify(discount) else {
            return Ok(PipelineOutcome::NotADeal {
                discount_percent: discount,
            });
        };

        let seen_at = sample.queried_at;
        let deal = NewDeal {
            deal_fingerprint: classifier::fingerprint(
                &sample.origin,
                &sample.destination,
                sample.departure_date,
                sample.trip_length,
                sample.cabin_class,
                sample.price,
            ),
            origin: sample.origin.clone(),
            destination: sample.destination.clone(),
            departure_date: sample.departure_date,
            return_date: sample.return_date,
            trip_length: sample.trip_length,
            cabin_class: sample.cabin_class,
            currency: sample.currency.clone(),
            price: sample.price,
            baseline_mean: baseline.mean_price,
            baseline_median: baseline.median_price,
            discount_percent: discount,
            deal_score: classifier::deal_score(discount, sample.cost_per_mile),
            deal_classification: classification,
            source_type: sample.source_type,
            seen_at,
            expires_at: seen_at + self.deal_ttl,
        };

        let upsert = self.db.upsert_detected_deal(&deal).await?;
        if upsert.inserted {
            info!(
                event = "DEAL_DETECTED",
                deal_id = upsert.deal.id,
                fingerprint = %upsert.deal.deal_fingerprint,
                classification = %classification,
                "[DEAL] {}-{} {} {}d | {:.2} {} vs mean {:.2} | -{:.1}%",
                deal.origin,
                deal.destination,
                deal.departure_date,
                deal.trip_length,
                deal.price,
                deal.currency,
                baseline.mean_price,
                discount,
            );
        } else {
            debug!(
                deal_id = upsert.deal.id,
                times_seen = upsert.deal.times_seen,
                "deal seen again"
            );
        }

        let alert = self.publisher.consider(&upsert.deal, now).await?;
        Ok(PipelineOutcome::Deal {
            upsert: Box::new(upsert),
            alert,
        })
    }
}
