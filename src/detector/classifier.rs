use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::config::{deal_thresholds, PRICE_BUCKET_RATIO};
use crate::types::{CabinClass, DealClassification};

/// Cost per mile at or above which a fare earns no score bonus.
const CPM_BONUS_CEILING: f64 = 0.10;
/// Largest score bonus for a very cheap cost per mile.
const CPM_BONUS_MAX: f64 = 10.0;

/// Percent below the baseline mean. Negative when the price is above it.
/// None when the mean is not a positive finite number.
pub fn discount_percent(baseline_mean: f64, price: f64) -> Option<f64> {
    if !baseline_mean.is_finite() || baseline_mean <= 0.0 || !price.is_finite() {
        return None;
    }
    Some((baseline_mean - price) / baseline_mean * 100.0)
}

/// Map a discount to its band, strongest first. Below 20% is not a deal.
pub fn classify(discount_percent: f64) -> Option<DealClassification> {
    use deal_thresholds::*;
    if discount_percent >= ERROR_FARE_MIN {
        Some(DealClassification::ErrorFare)
    } else if discount_percent >= AMAZING_MIN {
        Some(DealClassification::Amazing)
    } else if discount_percent >= GREAT_MIN {
        Some(DealClassification::Great)
    } else if discount_percent >= GOOD_MIN {
        Some(DealClassification::Good)
    } else {
        None
    }
}

/// Score in [0, 100]: 90% weight on the discount, up to 10 points for a cost
/// per mile below 0.10. Non-decreasing in the discount for a fixed cost per mile.
pub fn deal_score(discount_percent: f64, cost_per_mile: Option<f64>) -> f64 {
    let discount = if discount_percent.is_finite() {
        discount_percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let bonus = cost_per_mile
        .filter(|c| c.is_finite() && *c >= 0.0)
        .map(|c| ((CPM_BONUS_CEILING - c) / CPM_BONUS_CEILING).clamp(0.0, 1.0) * CPM_BONUS_MAX)
        .unwrap_or(0.0);
    let score = discount * 0.9 + bonus;
    (score * 100.0).round() / 100.0
}

/// Coarse geometric price bucket; neighbouring buckets differ by 25%.
pub fn price_bucket(price: f64) -> i64 {
    if !price.is_finite() || price <= 0.0 {
        return 0;
    }
    (price.ln() / PRICE_BUCKET_RATIO.ln()).floor() as i64
}

/// Stable identity of "the same deal" across repeated observations.
pub fn fingerprint(
    origin: &str,
    destination: &str,
    departure_date: NaiveDate,
    trip_length: i64,
    cabin_class: CabinClass,
    price: f64,
) -> String {
    let input = format!(
        "{}|{}|{}|{}|{}|{}",
        origin.to_ascii_uppercase(),
        destination.to_ascii_uppercase(),
        departure_date.format("%Y-%m-%d"),
        trip_length,
        cabin_class,
        price_bucket(price),
    );
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_twenty_percent_is_good() {
        let d = discount_percent(500.0, 400.0).unwrap();
        assert_eq!(classify(d), Some(DealClassification::Good));
    }

    #[test]
    fn just_under_twenty_percent_is_not_a_deal() {
        assert_eq!(classify(19.99), None);
        let d = discount_percent(100.0, 80.01).unwrap();
        assert_eq!(classify(d), None);
    }

    #[test]
    fn seventy_percent_is_error_fare() {
        assert_eq!(classify(70.0), Some(DealClassification::ErrorFare));
        let d = discount_percent(1000.0, 300.0).unwrap();
        assert_eq!(classify(d), Some(DealClassification::ErrorFare));
    }

    #[test]
    fn middle_bands() {
        assert_eq!(classify(35.0), Some(DealClassification::Great));
        assert_eq!(classify(49.99), Some(DealClassification::Great));
        assert_eq!(classify(50.0), Some(DealClassification::Amazing));
        assert_eq!(classify(69.99), Some(DealClassification::Amazing));
        assert_eq!(classify(34.99), Some(DealClassification::Good));
    }

    #[test]
    fn price_above_mean_is_negative_discount() {
        assert!(discount_percent(100.0, 150.0).unwrap() < 0.0);
        assert_eq!(classify(-50.0), None);
        assert!(discount_percent(0.0, 10.0).is_none());
    }

    #[test]
    fn score_is_monotonic_and_bounded() {
        let mut last = -1.0;
        for d in (0..=100).map(|x| x as f64) {
            let s = deal_score(d, None);
            assert!(s >= last);
            last = s;
        }
        assert_eq!(deal_score(250.0, Some(0.0)), 100.0);
        assert_eq!(deal_score(-30.0, None), 0.0);
        assert_eq!(deal_score(50.0, Some(0.5)), 45.0);
        assert_eq!(deal_score(50.0, Some(0.05)), 50.0);
    }

    #[test]
    fn fingerprint_is_stable_and_bucketed() {
        let date = NaiveDate::from_ymd_opt(2026, 12, 5).unwrap();
        let a = fingerprint("JFK", "CDG", date, 7, CabinClass::Economy, 100.0);
        let b = fingerprint("jfk", "cdg", date, 7, CabinClass::Economy, 90.0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let c = fingerprint("JFK", "CDG", date, 7, CabinClass::Economy, 60.0);
        assert_ne!(a, c);
        let d = fingerprint("JFK", "CDG", date, 14, CabinClass::Economy, 100.0);
        assert_ne!(a, d);
        let e = fingerprint("JFK", "CDG", date, 7, CabinClass::Business, 100.0);
        assert_ne!(a, e);
    }
}
