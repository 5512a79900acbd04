//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use checkout::{CheckoutConfig, ShippingPolicy};
use common::Money;

/// Longest anonymous cart lifetime accepted from the environment, 10 years.
const MAX_CART_TTL_HOURS: i64 = 24 * 365 * 10;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" | "pretty" => Ok(LogFormat::Plain),
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
/// - `LOG_FORMAT`: `plain` or `json` (default: `plain`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store when unset
/// - `SEED_FILE`: JSON catalog and coupons loaded at startup
/// - `PRICE_TOLERANCE_CENTS` (default: `0`)
/// - `MAX_CONFLICT_RETRIES` (default: `16`)
/// - `SHIPPING_FLAT_FEE_CENTS` (default: `0`)
/// - `FREE_SHIPPING_THRESHOLD_CENTS` (optional)
/// - `TAX_RATE_BPS` (default: `0`)
/// - `ANONYMOUS_CART_TTL_HOURS` (default: `168`, at most ten years)
/// - `CHECKOUT_TIMEOUT_MS` (default: `10000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub seed_file: Option<PathBuf>,
    pub checkout: CheckoutConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = CheckoutConfig::default();
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<i64>().ok());

        let checkout = CheckoutConfig {
            price_tolerance: parsed("PRICE_TOLERANCE_CENTS")
                .map(|c| Money::from_cents(c.max(0)))
                .unwrap_or(defaults.price_tolerance),
            max_conflict_retries: parsed("MAX_CONFLICT_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_conflict_retries),
            shipping: ShippingPolicy {
                flat_fee: parsed("SHIPPING_FLAT_FEE_CENTS")
                    .map(|c| Money::from_cents(c.max(0)))
                    .unwrap_or(defaults.shipping.flat_fee),
                free_shipping_threshold: parsed("FREE_SHIPPING_THRESHOLD_CENTS")
                    .map(Money::from_cents),
            },
            tax_rate_bps: parsed("TAX_RATE_BPS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.tax_rate_bps),
            anonymous_cart_ttl: parsed("ANONYMOUS_CART_TTL_HOURS")
                .filter(|hours| *hours > 0)
                .and_then(|hours| chrono::Duration::try_hours(hours.min(MAX_CART_TTL_HOURS)))
                .unwrap_or(defaults.anonymous_cart_ttl),
            checkout_timeout: parsed("CHECKOUT_TIMEOUT_MS")
                .and_then(|n| u64::try_from(n).ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.checkout_timeout),
        };

        Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            seed_file: lookup("SEED_FILE")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            checkout,
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
            log_format: LogFormat::Plain,
            database_url: None,
            seed_file: None,
            checkout: CheckoutConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Plain);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.checkout.max_conflict_retries, 16);
        assert_eq!(config.checkout.anonymous_cart_ttl, chrono::Duration::hours(168));
        assert_eq!(config.checkout.checkout_timeout, Duration::from_millis(10_000));
        assert!(config.checkout.shipping.free_shipping_threshold.is_none());
    }

    #[test]
    fn test_checkout_policy_from_environment() {
        let config = from_pairs(&[
            ("PRICE_TOLERANCE_CENTS", "25"),
            ("MAX_CONFLICT_RETRIES", "4"),
            ("SHIPPING_FLAT_FEE_CENTS", "499"),
            ("FREE_SHIPPING_THRESHOLD_CENTS", "5000"),
            ("TAX_RATE_BPS", "825"),
            ("ANONYMOUS_CART_TTL_HOURS", "24"),
            ("CHECKOUT_TIMEOUT_MS", "2500"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/shop"),
        ]);

        assert_eq!(config.checkout.price_tolerance, Money::from_cents(25));
        assert_eq!(config.checkout.max_conflict_retries, 4);
        assert_eq!(config.checkout.shipping.flat_fee, Money::from_cents(499));
        assert_eq!(
            config.checkout.shipping.free_shipping_threshold,
            Some(Money::from_cents(5000))
        );
        assert_eq!(config.checkout.tax_rate_bps, 825);
        assert_eq!(config.checkout.anonymous_cart_ttl, chrono::Duration::hours(24));
        assert_eq!(config.checkout.checkout_timeout, Duration::from_millis(2500));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/shop"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("TAX_RATE_BPS", "-5"),
            ("LOG_FORMAT", "xml"),
            ("DATABASE_URL", ""),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.checkout.tax_rate_bps, 0);
        assert_eq!(config.log_format, LogFormat::Plain);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_cart_ttl_must_be_positive_and_in_range() {
        let defaults = CheckoutConfig::default();
        for hours in ["0", "-12", "soon"] {
            let config = from_pairs(&[("ANONYMOUS_CART_TTL_HOURS", hours)]);
            assert_eq!(config.checkout.anonymous_cart_ttl, defaults.anonymous_cart_ttl);
        }

        let config = from_pairs(&[("ANONYMOUS_CART_TTL_HOURS", "9223372036854775807")]);
        assert_eq!(
            config.checkout.anonymous_cart_ttl,
            chrono::Duration::hours(MAX_CART_TTL_HOURS)
        );
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
}
