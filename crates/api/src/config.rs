//! Application configuration loaded from environment variables.

use std::time::Duration;

use library::LibraryConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` for JSON log lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs on the in-memory store
/// - `DEFAULT_RESERVATION_HOURS`: hold used when a request names none (default: `24`)
/// - `OUTBOX_RECOVERY_INTERVAL_SECS`: how often undelivered effects are retried (default: `30`)
/// - `OUTBOX_RETENTION_HOURS`: how long dispatched effects are kept (default: `168`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub default_reservation_hours: u64,
    pub outbox_recovery_interval_secs: u64,
    pub outbox_retention_hours: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.log_json),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            default_reservation_hours: parse_var("DEFAULT_RESERVATION_HOURS")
                .filter(|&hours| hours > 0)
                .unwrap_or(defaults.default_reservation_hours),
            outbox_recovery_interval_secs: parse_var("OUTBOX_RECOVERY_INTERVAL_SECS")
                .filter(|&secs| secs > 0)
                .unwrap_or(defaults.outbox_recovery_interval_secs),
            outbox_retention_hours: parse_var("OUTBOX_RETENTION_HOURS")
                .unwrap_or(defaults.outbox_retention_hours),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the settings for the library workflows.
    pub fn library(&self) -> LibraryConfig {
        LibraryConfig::default().with_default_reservation_hours(self.default_reservation_hours)
    }

    /// Returns the outbox recovery period.
    pub fn outbox_recovery_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_recovery_interval_secs)
    }

    /// Returns how long dispatched outbox entries are kept.
    pub fn outbox_retention(&self) -> chrono::TimeDelta {
        i64::try_from(self.outbox_retention_hours)
            .ok()
            .and_then(chrono::TimeDelta::try_hours)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            default_reservation_hours: 24,
            outbox_recovery_interval_secs: 30,
            outbox_retention_hours: 168,
        }
    }
}
