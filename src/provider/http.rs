use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{PriceSource, ProviderError};
use crate::types::{FareQuery, FareQuote};

/// JSON fare search over HTTP.
///
/// Calls `GET {base}/search` with the query as URL parameters and accepts
/// either `{"offers": [...]}` or a bare array of offers. Each offer needs a
/// `price` (number or numeric string) and may carry `currency`,
/// `distance_miles` and `cost_per_mile`. The cheapest offer wins and is kept
/// verbatim as the raw payload.
pub struct HttpPriceSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPriceSource {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn params(query: &FareQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("origin", query.origin.clone()),
            ("destination", query.destination.clone()),
            ("departure_date", query.departure_date.format("%Y-%m-%d").to_string()),
            ("passengers", query.passengers.to_string()),
            ("cabin_class", query.cabin_class.to_string()),
            ("currency", query.currency.clone()),
        ];
        if let Some(ret) = query.return_date {
            params.push(("return_date", ret.format("%Y-%m-%d").to_string()));
        }
        if let Some(stops) = query.stops {
            params.push(("max_stops", stops.to_string()));
        }
        params
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn query(&self, query: &FareQuery) -> Result<FareQuote, ProviderError> {
        let url = format!("{}/search", self.base_url);
        let mut req = self.client.get(&url).query(&Self::params(query));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = resp.json().await?;
        let quote = parse_cheapest_offer(&body, &query.currency)?.ok_or_else(|| {
            ProviderError::NoFares(format!(
                "{}-{} {}",
                query.origin, query.destination, query.departure_date
            ))
        })?;
        debug!(
            origin = %query.origin,
            destination = %query.destination,
            price = quote.price,
            currency = %quote.currency,
            "provider quote"
        );
        Ok(quote)
    }
}

/// Pick the cheapest offer with a positive price. `Ok(None)` when the response
/// is well-formed but has no usable offers.
pub fn parse_cheapest_offer(
    body: &serde_json::Value,
    default_currency: &str,
) -> Result<Option<FareQuote>, ProviderError> {
    let offers = body
        .get("offers")
        .and_then(|o| o.as_array())
        .or_else(|| body.as_array())
        .ok_or_else(|| ProviderError::Malformed("expected an offers array".to_string()))?;

    let cheapest = offers
        .iter()
        .filter_map(|offer| number(offer.get("price")?).map(|p| (p, offer)))
        .filter(|(price, _)| price.is_finite() && *price > 0.0)
        .min_by(|(a, _), (b, _)| a.total_cmp(b));

    let Some((price, offer)) = cheapest else {
        return Ok(None);
    };

    let currency = offer
        .get("currency")
        .and_then(|c| c.as_str())
        .unwrap_or(default_currency)
        .to_ascii_uppercase();

    Ok(Some(FareQuote {
        price,
        currency,
        distance_miles: offer.get("distance_miles").and_then(number),
        cost_per_mile: offer.get("cost_per_mile").and_then(number),
        raw_offer: Some(offer.clone()),
    }))
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_cheapest_offer() {
        let body = json!({
            "offers": [
                {"price": 512.4, "currency": "usd"},
                {"price": "389.99", "currency": "USD", "distance_miles": 3451},
                {"price": 0},
                {"price": "n/a"}
            ]
        });
        let quote = parse_cheapest_offer(&body, "EUR").unwrap().unwrap();
        assert_eq!(quote.price, 389.99);
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.distance_miles, Some(3451.0));
        assert_eq!(quote.raw_offer.unwrap()["price"], "389.99");
    }

    #[test]
    fn bare_array_and_default_currency() {
        let body = json!([{"price": 120}]);
        let quote = parse_cheapest_offer(&body, "EUR").unwrap().unwrap();
        assert_eq!(quote.price, 120.0);
        assert_eq!(quote.currency, "EUR");
    }

    #[test]
    fn empty_offers_is_not_an_error() {
        assert!(parse_cheapest_offer(&json!({"offers": []}), "USD").unwrap().is_none());
    }

    #[test]
    fn non_array_is_malformed() {
        let err = parse_cheapest_offer(&json!({"error": "rate limited"}), "USD").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
