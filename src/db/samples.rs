//! Price samples and the rolling route baselines computed from them.

use chrono::{DateTime, Utc};

use super::models::RouteBaseline;
use super::Database;
use crate::error::Result;
use crate::types::{BaselineKey, PriceSample};

impl Database {
    /// Upsert keyed on (origin, destination, departure date, trip length, cabin, currency).
    /// The most recent query wins price and time; distance-derived fields and the
    /// raw offer are kept when the newer sample lacks them.
    pub async fn upsert_price_sample(&self, s: &PriceSample) -> Result<()> {
        let raw_offer = s.raw_offer.as_ref().map(|v| v.to_string());
        sqlx::query(
            "INSERT INTO price_samples (
                origin, destination, departure_date, return_date, trip_length, cabin_class,
                currency, price, passengers, stops, distance_miles, cost_per_mile, raw_offer,
                source_type, queried_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(origin, destination, departure_date, trip_length, cabin_class, currency)
             DO UPDATE SET
                price = CASE WHEN excluded.queried_at >= queried_at THEN excluded.price ELSE price END,
                source_type = CASE WHEN excluded.queried_at >= queried_at THEN excluded.source_type ELSE source_type END,
                queried_at = MAX(queried_at, excluded.queried_at),
                return_date = excluded.return_date,
                passengers = excluded.passengers,
                stops = excluded.stops,
                distance_miles = COALESCE(excluded.distance_miles, distance_miles),
                cost_per_mile = COALESCE(excluded.cost_per_mile, cost_per_mile),
                raw_offer = COALESCE(excluded.raw_offer, raw_offer)",
        )
        .bind(&s.origin)
        .bind(&s.destination)
        .bind(s.departure_date)
        .bind(s.return_date)
        .bind(s.trip_length)
        .bind(s.cabin_class)
        .bind(&s.currency)
        .bind(s.price)
        .bind(s.passengers)
        .bind(s.stops)
        .bind(s.distance_miles)
        .bind(s.cost_per_mile)
        .bind(raw_offer)
        .bind(s.source_type)
        .bind(s.queried_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Prices for one baseline key (currency included) whose last query falls
    /// inside `[start, end]`.
    pub async fn window_prices(
        &self,
        key: &BaselineKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let prices = sqlx::query_scalar::<_, f64>(
            "SELECT price FROM price_samples
             WHERE origin = ? AND destination = ? AND trip_length = ? AND cabin_class = ?
               AND currency = ? AND queried_at >= ? AND queried_at <= ?
             ORDER BY queried_at",
        )
        .bind(&key.origin)
        .bind(&key.destination)
        .bind(key.trip_length)
        .bind(key.cabin_class)
        .bind(&key.currency)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(prices)
    }

    /// Number of stored samples (all keys, all time).
    #[cfg(test)]
    pub(crate) async fn count_price_samples(&self) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM price_samples")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn upsert_route_baseline(&self, b: &RouteBaseline) -> Result<()> {
        sqlx::query(
            "INSERT INTO route_baselines (
                origin, destination, trip_length, cabin_class, currency, sample_count,
                mean_price, median_price, stddev_price, min_price, max_price, p10_price,
                p25_price, p75_price, p90_price, window_start, window_end, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(origin, destination, trip_length, cabin_class, currency) DO UPDATE SET
                sample_count = excluded.sample_count,
                mean_price = excluded.mean_price,
                median_price = excluded.median_price,
                stddev_price = excluded.stddev_price,
                min_price = excluded.min_price,
                max_price = excluded.max_price,
                p10_price = excluded.p10_price,
                p25_price = excluded.p25_price,
                p75_price = excluded.p75_price,
                p90_price = excluded.p90_price,
                window_start = excluded.window_start,
                window_end = excluded.window_end,
                updated_at = excluded.updated_at",
        )
        .bind(&b.origin)
        .bind(&b.destination)
        .bind(b.trip_length)
        .bind(b.cabin_class)
        .bind(&b.currency)
        .bind(b.sample_count)
        .bind(b.mean_price)
        .bind(b.median_price)
        .bind(b.stddev_price)
        .bind(b.min_price)
        .bind(b.max_price)
        .bind(b.p10_price)
        .bind(b.p25_price)
        .bind(b.p75_price)
        .bind(b.p90_price)
        .bind(b.window_start)
        .bind(b.window_end)
        .bind(b.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_route_baseline(&self, key: &BaselineKey) -> Result<Option<RouteBaseline>> {
        let row = sqlx::query_as::<_, RouteBaseline>(
            "SELECT origin, destination, trip_length, cabin_class, currency, sample_count,
                    mean_price, median_price, stddev_price, min_price, max_price, p10_price,
                    p25_price, p75_price, p90_price, window_start, window_end, updated_at
             FROM route_baselines
             WHERE origin = ? AND destination = ? AND trip_length = ? AND cabin_class = ?
               AND currency = ?",
        )
        .bind(&key.origin)
        .bind(&key.destination)
        .bind(key.trip_length)
        .bind(key.cabin_class)
        .bind(&key.currency)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
