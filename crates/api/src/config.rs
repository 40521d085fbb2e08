//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use saga::{CoordinatorConfig, PaymentOutcome, SweeperConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory storage when unset
/// - `HOLD_TTL_SECS`: how long a hold waits for payment (default: `600`)
/// - `SWEEP_INTERVAL_SECS`: expiry sweeper period (default: `30`)
/// - `MAX_TICKETS_PER_HOLD`: per-request quantity ceiling (default: `10`)
/// - `PAYMENT_OUTCOME`: outcome of simulated payments: `pending`, `succeeded`
///   or `failed` (default: `succeeded`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub hold_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_tickets_per_hold: u32,
    pub payment_outcome: PaymentOutcome,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var::<u16>(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            hold_ttl_secs: parse_var::<u64>(&lookup, "HOLD_TTL_SECS")
                .unwrap_or(defaults.hold_ttl_secs),
            sweep_interval_secs: parse_var::<u64>(&lookup, "SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            max_tickets_per_hold: parse_var::<u32>(&lookup, "MAX_TICKETS_PER_HOLD")
                .filter(|max| *max > 0)
                .unwrap_or(defaults.max_tickets_per_hold),
            payment_outcome: lookup("PAYMENT_OUTCOME")
                .and_then(|v| parse_payment_outcome(&v))
                .unwrap_or(defaults.payment_outcome),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let hold_ttl_secs = i64::try_from(self.hold_ttl_secs).unwrap_or(i64::MAX);
        CoordinatorConfig::default()
            .with_hold_ttl(chrono::Duration::try_seconds(hold_ttl_secs).unwrap_or_default())
            .with_max_tickets_per_hold(self.max_tickets_per_hold)
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: StdDuration::from_secs(self.sweep_interval_secs),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

fn parse_payment_outcome(value: &str) -> Option<PaymentOutcome> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pending" => Some(PaymentOutcome::Pending),
        "succeeded" => Some(PaymentOutcome::Succeeded),
        "failed" => Some(PaymentOutcome::Failed),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            hold_ttl_secs: 600,
            sweep_interval_secs: 30,
            max_tickets_per_hold: 10,
            payment_outcome: PaymentOutcome::Succeeded,
        }
    }
}
