//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use orders::{OrderConfig, SweeperConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `RESERVATION_TTL_SECS` (default `600`)
/// - `SWEEP_INTERVAL_SECS` (default `60`), `SWEEP_BATCH_SIZE` (default `500`)
/// - `PAYMENT_CURRENCY` (default `INR`)
/// - `GATEWAY_KEY_SECRET` (default `dev-secret`)
/// - `ADMIN_TOKEN`: unset rejects every admin request
///
/// Values that fail to parse fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub reservation_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
    pub currency: String,
    pub gateway_key_secret: String,
    pub admin_token: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: parse(lookup("PORT")).unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(lookup("LOG_FORMAT")).unwrap_or(defaults.log_format),
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parse(lookup("DATABASE_MAX_CONNECTIONS"))
                .unwrap_or(defaults.database_max_connections),
            reservation_ttl_secs: parse(lookup("RESERVATION_TTL_SECS"))
                .filter(|secs: &i64| *secs > 0)
                .unwrap_or(defaults.reservation_ttl_secs),
            sweep_interval_secs: parse(lookup("SWEEP_INTERVAL_SECS"))
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            sweep_batch_size: parse(lookup("SWEEP_BATCH_SIZE"))
                .filter(|size: &usize| *size > 0)
                .unwrap_or(defaults.sweep_batch_size),
            currency: non_empty("PAYMENT_CURRENCY").unwrap_or(defaults.currency),
            gateway_key_secret: non_empty("GATEWAY_KEY_SECRET")
                .unwrap_or(defaults.gateway_key_secret),
            admin_token: non_empty("ADMIN_TOKEN"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn order_config(&self) -> OrderConfig {
        OrderConfig {
            reservation_ttl: chrono::Duration::seconds(self.reservation_ttl_secs),
            currency: self.currency.clone(),
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            batch_size: self.sweep_batch_size,
        }
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            reservation_ttl_secs: 600,
            sweep_interval_secs: 60,
            sweep_batch_size: 500,
            currency: "INR".to_string(),
            gateway_key_secret: "dev-secret".to_string(),
            admin_token: None,
        }
    }
}
