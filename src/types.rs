use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Airports and routes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airport {
    /// IATA code, e.g. "JFK".
    pub code: String,
    /// ISO 3166 alpha-2 country code, e.g. "US".
    pub country: String,
}

impl Airport {
    pub fn new(code: &str, country: &str) -> Self {
        Self {
            code: code.to_string(),
            country: country.to_string(),
        }
    }
}

/// An ordered (origin, destination) airport pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub origin: String,
    pub destination: String,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.origin, self.destination)
    }
}

// ---------------------------------------------------------------------------
// Enumerations stored as TEXT
// ---------------------------------------------------------------------------

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PacingMode {
    /// Delay computed each step so the sweep lands on its target duration.
    Adaptive,
    /// Always `min_delay_ms`.
    Fixed,
}

text_enum!(PacingMode {
    Adaptive => "adaptive",
    Fixed => "fixed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CabinClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
}

text_enum!(CabinClass {
    Economy => "economy",
    PremiumEconomy => "premium_economy",
    Business => "business",
    First => "first",
});

/// Deal strength. Variant order is the ranking: `Good < Great < Amazing < ErrorFare`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DealClassification {
    /// discount >= 20%
    Good,
    /// discount >= 35%
    Great,
    /// discount >= 50%
    Amazing,
    /// discount >= 70%, most likely a mispriced fare
    ErrorFare,
}

text_enum!(DealClassification {
    Good => "good",
    Great => "great",
    Amazing => "amazing",
    ErrorFare => "error_fare",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SourceType {
    Sweep,
    Social,
    Webhook,
    Manual,
}

text_enum!(SourceType {
    Sweep => "sweep",
    Social => "social",
    Webhook => "webhook",
    Manual => "manual",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DealStatus {
    Active,
    Expired,
    Published,
    Verified,
}

text_enum!(DealStatus {
    Active => "active",
    Expired => "expired",
    Published => "published",
    Verified => "verified",
});

// ---------------------------------------------------------------------------
// Sweep control
// ---------------------------------------------------------------------------

/// The two fields owned by the control path. Never written by the progress save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ControlFlags {
    pub is_running: bool,
    pub is_paused: bool,
}

/// Operator requests on the control path. Each maps to one flag update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Start,
    Stop,
    Pause,
    Resume,
}

text_enum!(ControlCommand {
    Start => "start",
    Stop => "stop",
    Pause => "pause",
    Resume => "resume",
});

/// Scheduler lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
}

impl SchedulerState {
    pub fn from_flags(flags: ControlFlags) -> Self {
        match (flags.is_running, flags.is_paused) {
            (false, _) => SchedulerState::Idle,
            (true, true) => SchedulerState::Paused,
            (true, false) => SchedulerState::Running,
        }
    }
}

/// Operator-tunable sweep settings. Written through their own update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    pub trip_lengths: Vec<i64>,
    pub pacing_mode: PacingMode,
    pub target_duration_hours: f64,
    pub min_delay_ms: i64,
    pub international_only: bool,
}

/// Current UTC time truncated to milliseconds, the precision we persist.
pub fn utc_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Price source messages
// ---------------------------------------------------------------------------

/// One request to the upstream fare source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FareQuery {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    /// None for one-way queries (trip length 0).
    pub return_date: Option<NaiveDate>,
    pub trip_length: i64,
    pub passengers: i64,
    pub cabin_class: CabinClass,
    /// Maximum stops; None means any.
    pub stops: Option<i64>,
    pub currency: String,
}

/// Cheapest offer returned for a `FareQuery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareQuote {
    pub price: f64,
    pub currency: String,
    pub distance_miles: Option<f64>,
    pub cost_per_mile: Option<f64>,
    pub raw_offer: Option<serde_json::Value>,
}

/// A single observation fed to the detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub trip_length: i64,
    pub cabin_class: CabinClass,
    pub currency: String,
    pub price: f64,
    pub passengers: i64,
    pub stops: Option<i64>,
    pub distance_miles: Option<f64>,
    pub cost_per_mile: Option<f64>,
    pub raw_offer: Option<serde_json::Value>,
    pub source_type: SourceType,
    pub queried_at: DateTime<Utc>,
}

impl PriceSample {
    pub fn from_quote(
        query: &FareQuery,
        quote: FareQuote,
        source_type: SourceType,
        queried_at: DateTime<Utc>,
    ) -> Self {
        // Some sources only report distance; derive cost per mile when we can.
        let cost_per_mile = quote.cost_per_mile.or_else(|| {
            quote
                .distance_miles
                .filter(|d| *d > 0.0)
                .map(|d| quote.price / d)
        });
        Self {
            origin: query.origin.clone(),
            destination: query.destination.clone(),
            departure_date: query.departure_date,
            return_date: query.return_date,
            trip_length: query.trip_length,
            cabin_class: query.cabin_class,
            currency: quote.currency,
            price: quote.price,
            passengers: query.passengers,
            stops: query.stops,
            distance_miles: quote.distance_miles,
            cost_per_mile,
            raw_offer: quote.raw_offer,
            source_type,
            queried_at,
        }
    }
}

/// Identifies one rolling baseline distribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaselineKey {
    pub origin: String,
    pub destination: String,
    pub trip_length: i64,
    pub cabin_class: CabinClass,
    pub currency: String,
}

impl BaselineKey {
    pub fn for_sample(sample: &PriceSample) -> Self {
        Self {
            origin: sample.origin.clone(),
            destination: sample.destination.clone(),
            trip_length: sample.trip_length,
            cabin_class: sample.cabin_class,
            currency: sample.currency.clone(),
        }
    }
}

impl std::fmt::Display for BaselineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}/{}d/{}/{}",
            self.origin, self.destination, self.trip_length, self.cabin_class, self.currency
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_order_is_strength() {
        assert!(DealClassification::Good < DealClassification::Great);
        assert!(DealClassification::Great < DealClassification::Amazing);
        assert!(DealClassification::Amazing < DealClassification::ErrorFare);
    }

    #[test]
    fn text_enums_parse_case_insensitively() {
        assert_eq!("Adaptive".parse::<PacingMode>(), Ok(PacingMode::Adaptive));
        assert_eq!(
            "error_fare".parse::<DealClassification>(),
            Ok(DealClassification::ErrorFare)
        );
        assert_eq!(
            "premium_economy".parse::<CabinClass>(),
            Ok(CabinClass::PremiumEconomy)
        );
        assert!("bogus".parse::<DealStatus>().is_err());
    }

    #[test]
    fn scheduler_state_from_flags() {
        let idle = ControlFlags { is_running: false, is_paused: true };
        let paused = ControlFlags { is_running: true, is_paused: true };
        let running = ControlFlags { is_running: true, is_paused: false };
        assert_eq!(SchedulerState::from_flags(idle), SchedulerState::Idle);
        assert_eq!(SchedulerState::from_flags(paused), SchedulerState::Paused);
        assert_eq!(SchedulerState::from_flags(running), SchedulerState::Running);
    }

    #[test]
    fn sample_derives_cost_per_mile_from_distance() {
        let query = FareQuery {
            origin: "JFK".into(),
            destination: "LHR".into(),
            departure_date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            return_date: None,
            trip_length: 0,
            passengers: 1,
            cabin_class: CabinClass::Economy,
            stops: None,
            currency: "USD".into(),
        };
        let quote = FareQuote {
            price: 345.0,
            currency: "USD".into(),
            distance_miles: Some(3450.0),
            cost_per_mile: None,
            raw_offer: None,
        };
        let sample = PriceSample::from_quote(&query, quote, SourceType::Sweep, Utc::now());
        assert_eq!(sample.cost_per_mile, Some(0.1));
    }
}
