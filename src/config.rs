use crate::error::{AppError, Result};
use crate::types::{Airport, CabinClass, DealClassification, PacingMode, SweepSettings};

pub const PROVIDER_URL: &str = "http://localhost:8080";

/// Upper clamp for the adaptive delay when the sweep runs far ahead of schedule.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// How often a paused or idle scheduler re-reads the control flags from the store.
pub const CONTROL_POLL_INTERVAL_SECS: u64 = 5;

/// Deal expiry sweep interval (seconds).
pub const EXPIRY_INTERVAL_SECS: u64 = 300;

/// Channel capacity for published alerts waiting on the notifier.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Ratio between consecutive fingerprint price buckets (25% wide).
pub const PRICE_BUCKET_RATIO: f64 = 1.25;

/// Discount thresholds (percent below baseline mean).
pub mod deal_thresholds {
    pub const GOOD_MIN: f64 = 20.0;
    pub const GREAT_MIN: f64 = 35.0;
    pub const AMAZING_MIN: f64 = 50.0;
    pub const ERROR_FARE_MIN: f64 = 70.0;
}

/// Built-in airport table used when SWEEP_AIRPORTS is not set.
/// Order matters: a persisted route index refers to a position in this list.
pub const DEFAULT_AIRPORTS: &[(&str, &str)] = &[
    ("JFK", "US"),
    ("LAX", "US"),
    ("ORD", "US"),
    ("SFO", "US"),
    ("MIA", "US"),
    ("SEA", "US"),
    ("BOS", "US"),
    ("DFW", "US"),
    ("YYZ", "CA"),
    ("YVR", "CA"),
    ("MEX", "MX"),
    ("LHR", "GB"),
    ("CDG", "FR"),
    ("AMS", "NL"),
    ("FRA", "DE"),
    ("MAD", "ES"),
    ("FCO", "IT"),
    ("LIS", "PT"),
    ("DUB", "IE"),
    ("IST", "TR"),
    ("DXB", "AE"),
    ("NRT", "JP"),
    ("ICN", "KR"),
    ("HKG", "HK"),
    ("SIN", "SG"),
    ("BKK", "TH"),
    ("SYD", "AU"),
    ("GRU", "BR"),
];

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Fare search endpoint base (PROVIDER_URL)
    pub provider_url: String,
    /// Bearer token for the fare source (PROVIDER_API_KEY)
    pub provider_api_key: Option<String>,
    /// Per-query timeout (PROVIDER_TIMEOUT_SECS)
    pub provider_timeout_secs: u64,
    pub currency: String,
    pub cabin_class: CabinClass,
    pub passengers: i64,
    /// None = any number of stops (FARE_MAX_STOPS)
    pub max_stops: Option<i64>,
    /// Departure date offset from today (DEPARTURE_LEAD_DAYS)
    pub departure_lead_days: i64,
    /// Airport table for the route universe (SWEEP_AIRPORTS, "JFK:US,LHR:GB,...")
    pub airports: Vec<Airport>,
    /// Seed for the progress row on first boot; the stored row wins afterwards.
    pub sweep_defaults: SweepSettings,
    /// Adaptive delay ceiling (SWEEP_MAX_DELAY_MS)
    pub max_delay_ms: u64,
    /// Issue a start through the control path at boot (SWEEP_AUTOSTART)
    pub autostart: bool,
    pub baseline_window_days: i64,
    pub baseline_min_samples: i64,
    pub deal_ttl_hours: i64,
    pub alert_min_classification: DealClassification,
    pub alert_min_score: f64,
    pub alert_republish_on_upgrade: bool,
    pub alert_channels: Vec<String>,
    pub alert_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "sweeper.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            provider_url: std::env::var("PROVIDER_URL")
                .unwrap_or_else(|_| PROVIDER_URL.to_string()),
            provider_api_key: optional_var("PROVIDER_API_KEY"),
            provider_timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            currency: std::env::var("FARE_CURRENCY")
                .unwrap_or_else(|_| "USD".to_string())
                .to_ascii_uppercase(),
            cabin_class: std::env::var("FARE_CABIN_CLASS")
                .unwrap_or_else(|_| "economy".to_string())
                .parse::<CabinClass>()
                .map_err(AppError::Config)?,
            passengers: std::env::var("FARE_PASSENGERS")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<i64>()
                .unwrap_or(1)
                .max(1),
            max_stops: optional_var("FARE_MAX_STOPS").and_then(|s| s.parse::<i64>().ok()),
            departure_lead_days: std::env::var("DEPARTURE_LEAD_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<i64>()
                .unwrap_or(30),
            airports: match optional_var("SWEEP_AIRPORTS") {
                Some(raw) => parse_airports(&raw)?,
                None => default_airports(),
            },
            sweep_defaults: SweepSettings {
                trip_lengths: parse_trip_lengths(
                    &std::env::var("SWEEP_TRIP_LENGTHS").unwrap_or_else(|_| "7,14".to_string()),
                )?,
                pacing_mode: std::env::var("SWEEP_PACING_MODE")
                    .unwrap_or_else(|_| "adaptive".to_string())
                    .parse::<PacingMode>()
                    .map_err(AppError::Config)?,
                target_duration_hours: std::env::var("SWEEP_TARGET_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse::<f64>()
                    .unwrap_or(24.0),
                min_delay_ms: std::env::var("SWEEP_MIN_DELAY_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse::<i64>()
                    .unwrap_or(1000)
                    .max(0),
                international_only: parse_bool("SWEEP_INTERNATIONAL_ONLY", false),
            },
            max_delay_ms: std::env::var("SWEEP_MAX_DELAY_MS")
                .unwrap_or_else(|_| DEFAULT_MAX_DELAY_MS.to_string())
                .parse::<u64>()
                .unwrap_or(DEFAULT_MAX_DELAY_MS),
            autostart: parse_bool("SWEEP_AUTOSTART", false),
            baseline_window_days: std::env::var("BASELINE_WINDOW_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<i64>()
                .unwrap_or(30)
                .max(1),
            baseline_min_samples: std::env::var("BASELINE_MIN_SAMPLES")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<i64>()
                .unwrap_or(5)
                .max(1),
            deal_ttl_hours: std::env::var("DEAL_TTL_HOURS")
                .unwrap_or_else(|_| "72".to_string())
                .parse::<i64>()
                .unwrap_or(72),
            alert_min_classification: std::env::var("ALERT_MIN_CLASSIFICATION")
                .unwrap_or_else(|_| "great".to_string())
                .parse::<DealClassification>()
                .map_err(AppError::Config)?,
            alert_min_score: std::env::var("ALERT_MIN_SCORE")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<f64>()
                .unwrap_or(0.0),
            alert_republish_on_upgrade: parse_bool("ALERT_REPUBLISH_ON_UPGRADE", true),
            alert_channels: std::env::var("ALERT_CHANNELS")
                .unwrap_or_else(|_| "log".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            alert_webhook_url: optional_var("ALERT_WEBHOOK_URL"),
        })
    }
}

pub fn default_airports() -> Vec<Airport> {
    DEFAULT_AIRPORTS
        .iter()
        .map(|(code, country)| Airport::new(code, country))
        .collect()
}

/// Parses "JFK:US,LHR:GB". Order is preserved; duplicate codes are rejected
/// since they would produce self-routes under another name.
pub fn parse_airports(raw: &str) -> Result<Vec<Airport>> {
    let mut airports: Vec<Airport> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((code, country)) = entry.split_once(':') else {
            return Err(AppError::Config(format!(
                "SWEEP_AIRPORTS entry '{entry}' must look like CODE:COUNTRY"
            )));
        };
        let code = code.trim().to_ascii_uppercase();
        if airports.iter().any(|a| a.code == code) {
            return Err(AppError::Config(format!("SWEEP_AIRPORTS lists {code} twice")));
        }
        airports.push(Airport::new(&code, &country.trim().to_ascii_uppercase()));
    }
    if airports.len() < 2 {
        return Err(AppError::Config(
            "SWEEP_AIRPORTS needs at least two airports".to_string(),
        ));
    }
    Ok(airports)
}

pub fn parse_trip_lengths(raw: &str) -> Result<Vec<i64>> {
    let lengths = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .ok()
                .filter(|n| *n >= 0)
                .ok_or_else(|| AppError::Config(format!("invalid trip length '{s}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    if lengths.is_empty() {
        return Err(AppError::Config(
            "SWEEP_TRIP_LENGTHS must name at least one trip length".to_string(),
        ));
    }
    Ok(lengths)
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_bool(name: &str, default: bool) -> bool {
    match optional_var(name).as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn airports_parse_in_order() {
        let airports = parse_airports("jfk:us, LHR:GB,CDG:FR").unwrap();
        let codes: Vec<_> = airports.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, vec!["JFK", "LHR", "CDG"]);
        assert_eq!(airports[0].country, "US");
    }

    #[test]
    fn airports_reject_duplicates_and_garbage() {
        assert!(parse_airports("JFK:US,JFK:US").is_err());
        assert!(parse_airports("JFK").is_err());
        assert!(parse_airports("JFK:US").is_err());
    }

    #[test]
    fn trip_lengths_allow_one_way() {
        assert_eq!(parse_trip_lengths("0, 7,14").unwrap(), vec![0, 7, 14]);
        assert!(parse_trip_lengths("").is_err());
        assert!(parse_trip_lengths("7,-1").is_err());
    }

    #[test]
    fn default_airport_codes_are_unique() {
        let airports = default_airports();
        let mut codes: Vec<_> = airports.iter().map(|a| a.code.clone()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), airports.len());
    }
}
