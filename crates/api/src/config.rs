//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::CheckoutConfig;
use inventory::{PartialPolicy, ReservationConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default `"0.0.0.0"`) and `PORT` (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `json` for structured output, anything else for text
/// - `DATABASE_URL`: PostgreSQL stores when set, in-memory otherwise
/// - `LOCK_TOKEN_TTL_SECS` (5), `RESERVATION_TTL_SECS` (900),
///   `CHECKOUT_TTL_SECS` (1800), `DOWNSTREAM_TIMEOUT_MS` (5000),
///   `SWEEP_INTERVAL_SECS` (30)
/// - `PARTIAL_POLICY`: `reject` (default) or `accept`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub json_logs: bool,
    pub database_url: Option<String>,
    pub lock_token_ttl: Duration,
    pub reservation_ttl: Duration,
    pub checkout_ttl: Duration,
    pub downstream_timeout: Duration,
    pub sweep_interval: Duration,
    pub partial_policy: PartialPolicy,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            json_logs: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            lock_token_ttl: secs("LOCK_TOKEN_TTL_SECS", defaults.lock_token_ttl),
            reservation_ttl: secs("RESERVATION_TTL_SECS", defaults.reservation_ttl),
            checkout_ttl: secs("CHECKOUT_TTL_SECS", defaults.checkout_ttl),
            downstream_timeout: lookup("DOWNSTREAM_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.downstream_timeout),
            sweep_interval: secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            partial_policy: lookup("PARTIAL_POLICY")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.partial_policy),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reservation_config(&self) -> ReservationConfig {
        ReservationConfig {
            lock_token_ttl: self.lock_token_ttl,
            reservation_ttl: self.reservation_ttl,
            partial_policy: self.partial_policy,
            ..ReservationConfig::default()
        }
    }

    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            checkout_ttl: self.checkout_ttl,
            downstream_timeout: self.downstream_timeout,
            ..CheckoutConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let reservations = ReservationConfig::default();
        let checkouts = CheckoutConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            json_logs: false,
            database_url: None,
            lock_token_ttl: reservations.lock_token_ttl,
            reservation_ttl: reservations.reservation_ttl,
            checkout_ttl: checkouts.checkout_ttl,
            downstream_timeout: checkouts.downstream_timeout,
            sweep_interval: Duration::from_secs(30),
            partial_policy: reservations.partial_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.lock_token_ttl, Duration::from_secs(5));
        assert_eq!(config.reservation_ttl, Duration::from_secs(900));
        assert_eq!(config.checkout_ttl, Duration::from_secs(1800));
        assert_eq!(config.downstream_timeout, Duration::from_millis(5000));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.partial_policy, PartialPolicy::Reject);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9090"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/checkout"),
            ("CHECKOUT_TTL_SECS", "60"),
            ("DOWNSTREAM_TIMEOUT_MS", "250"),
            ("PARTIAL_POLICY", "accept"),
        ]));
        assert_eq!(config.port, 9090);
        assert!(config.json_logs);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/checkout")
        );
        assert_eq!(config.checkout_config().checkout_ttl, Duration::from_secs(60));
        assert_eq!(
            config.checkout_config().downstream_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.reservation_config().partial_policy,
            PartialPolicy::Accept
        );
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "not-a-port"),
            ("SWEEP_INTERVAL_SECS", "-1"),
            ("PARTIAL_POLICY", "sometimes"),
            ("DATABASE_URL", ""),
        ]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.partial_policy, PartialPolicy::Reject);
        assert!(config.database_url.is_none());
    }
}
