//! Application configuration loaded from environment variables.

use std::time::Duration;

use order::ReaperConfig;
use outbox::DispatcherConfig;
use payment::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: Postgres repositories when set, in-memory otherwise
/// - `REDIS_URL`: Redis key-value store when set, in-memory otherwise
/// - `OUTBOX_INTERVAL_SECS`, `OUTBOX_BATCH_SIZE`, `OUTBOX_SEND_TIMEOUT_SECS`,
///   `OUTBOX_MAX_RETRIES`: dispatcher tuning
/// - `ORDER_PAY_TIMEOUT_SECS`: pending-pay window, also the payment expiry
/// - `REAPER_INTERVAL_SECS`, `REAPER_BATCH_SIZE`: timeout reaper tuning
/// - `PAYMENT_SWEEP_INTERVAL_SECS`: expired-payment sweep tick
/// - `PAYMENT_ENVIRONMENT`: `sandbox` or `production`
/// - `PAYMENT_SIGNING_KEY`: enables SHA-256 callback signature checks
/// - `SHUTDOWN_GRACE_SECS`: how long background tasks get to drain
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub outbox: DispatcherConfig,
    pub pay_timeout: Duration,
    pub reaper: ReaperConfig,
    pub payment_sweep_interval: Duration,
    pub payment_environment: Environment,
    pub payment_signing_key: Option<String>,
    pub shutdown_grace: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let string = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| {
            string(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| Duration::from_secs(number(key, default.as_secs()));

        let log_format = match string("LOG_FORMAT").as_deref().map(str::trim) {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let payment_environment = string("PAYMENT_ENVIRONMENT")
            .and_then(|v| Environment::parse(v.trim()))
            .unwrap_or_default();

        Self {
            host: string("HOST").unwrap_or(defaults.host),
            port: string("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: string("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: string("DATABASE_URL"),
            redis_url: string("REDIS_URL"),
            outbox: DispatcherConfig {
                interval: secs("OUTBOX_INTERVAL_SECS", defaults.outbox.interval),
                batch_size: number("OUTBOX_BATCH_SIZE", defaults.outbox.batch_size as u64)
                    as usize,
                send_timeout: secs("OUTBOX_SEND_TIMEOUT_SECS", defaults.outbox.send_timeout),
                max_retries: number("OUTBOX_MAX_RETRIES", defaults.outbox.max_retries as u64)
                    as u32,
            },
            pay_timeout: secs("ORDER_PAY_TIMEOUT_SECS", defaults.pay_timeout),
            reaper: ReaperConfig {
                interval: secs("REAPER_INTERVAL_SECS", defaults.reaper.interval),
                batch_size: number("REAPER_BATCH_SIZE", defaults.reaper.batch_size as u64)
                    as usize,
            },
            payment_sweep_interval: secs(
                "PAYMENT_SWEEP_INTERVAL_SECS",
                defaults.payment_sweep_interval,
            ),
            payment_environment,
            payment_signing_key: string("PAYMENT_SIGNING_KEY"),
            shutdown_grace: secs("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
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
            redis_url: None,
            outbox: DispatcherConfig::default(),
            pay_timeout: Duration::from_secs(1800),
            reaper: ReaperConfig::default(),
            payment_sweep_interval: Duration::from_secs(60),
            payment_environment: Environment::Sandbox,
            payment_signing_key: None,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_map(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.outbox.interval, Duration::from_secs(10));
        assert_eq!(config.outbox.batch_size, 100);
        assert_eq!(config.outbox.max_retries, 5);
        assert_eq!(config.pay_timeout, Duration::from_secs(1800));
        assert_eq!(config.reaper.batch_size, 100);
        assert_eq!(config.payment_environment, Environment::Sandbox);
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("OUTBOX_BATCH_SIZE", "7"),
            ("ORDER_PAY_TIMEOUT_SECS", "60"),
            ("PAYMENT_ENVIRONMENT", "production"),
            ("PAYMENT_SIGNING_KEY", "k"),
        ]);
        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/shop")
        );
        assert_eq!(config.outbox.batch_size, 7);
        assert_eq!(config.pay_timeout, Duration::from_secs(60));
        assert_eq!(config.payment_environment, Environment::Production);
        assert_eq!(config.payment_signing_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = from_map(&[("PORT", "eighty"), ("REAPER_INTERVAL_SECS", "-1"), ("REDIS_URL", " ")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.reaper.interval, Duration::from_secs(60));
        assert!(config.redis_url.is_none());
    }
}
