//! # Checkout Configuration
//!
//! Immutable settings for the checkout flow, read once at process start and
//! shared by every component.

use crate::catalog::Currency;
use crate::session::CheckoutUrls;
use crate::store::Granularity;
use std::env;
use thiserror::Error;

/// Invalid configuration value
#[derive(Debug, Error)]
#[error("Invalid {key}: {message}")]
pub struct ConfigError {
    pub key: &'static str,
    pub message: String,
}

impl ConfigError {
    fn new(key: &'static str, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
        }
    }
}

/// Per-caller admission budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_minute: i64,
    pub per_hour: i64,
}

impl RateLimits {
    pub fn new(per_minute: i64, per_hour: i64) -> Self {
        Self {
            per_minute,
            per_hour,
        }
    }

    pub fn limit(&self, granularity: Granularity) -> i64 {
        match granularity {
            Granularity::Minute => self.per_minute,
            Granularity::Hour => self.per_hour,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::new(10, 100)
    }
}

/// Checkout flow configuration
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Base URL for success/cancel redirects
    pub site_url: String,

    /// Currency used when neither the request nor the profile names one
    pub default_currency: Currency,

    pub supported_currencies: Vec<Currency>,

    pub rate_limits: RateLimits,

    /// Cross-check catalog prices against the processor's live records
    pub verify_prices: bool,

    pub allow_promotion_codes: bool,

    /// Name recorded in the error log and used as the admission scope
    pub function_name: String,

    /// Where unauthenticated callers are sent
    pub login_path: String,

    /// Offline booking flow for bank-transfer services
    pub booking_path: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            site_url: "http://localhost:3000".to_string(),
            default_currency: Currency::CHF,
            supported_currencies: Currency::ALL.to_vec(),
            rate_limits: RateLimits::default(),
            verify_prices: true,
            allow_promotion_codes: true,
            function_name: "create-checkout".to_string(),
            login_path: "/login".to_string(),
            booking_path: "/booking".to_string(),
        }
    }
}

impl CheckoutConfig {
    /// Load configuration from environment variables.
    ///
    /// Every key is optional; unset keys keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_currency = match get("DEFAULT_CURRENCY") {
            Some(code) => code
                .parse::<Currency>()
                .map_err(|e| ConfigError::new("DEFAULT_CURRENCY", e))?,
            None => defaults.default_currency,
        };

        let supported_currencies = match get("SUPPORTED_CURRENCIES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| c.parse::<Currency>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConfigError::new("SUPPORTED_CURRENCIES", e))?,
            None => defaults.supported_currencies,
        };

        if !supported_currencies.contains(&default_currency) {
            return Err(ConfigError::new(
                "DEFAULT_CURRENCY",
                format!("{} is not in SUPPORTED_CURRENCIES", default_currency),
            ));
        }

        let rate_limits = RateLimits::new(
            parse_number(get("RATE_LIMIT_PER_MINUTE"), "RATE_LIMIT_PER_MINUTE", defaults.rate_limits.per_minute)?,
            parse_number(get("RATE_LIMIT_PER_HOUR"), "RATE_LIMIT_PER_HOUR", defaults.rate_limits.per_hour)?,
        );

        Ok(Self {
            site_url: get("SITE_URL").unwrap_or(defaults.site_url),
            default_currency,
            supported_currencies,
            rate_limits,
            verify_prices: parse_flag(get("VERIFY_PRICES"), defaults.verify_prices),
            allow_promotion_codes: parse_flag(get("ALLOW_PROMOTION_CODES"), defaults.allow_promotion_codes),
            function_name: get("FUNCTION_NAME").unwrap_or(defaults.function_name),
            login_path: get("LOGIN_PATH").unwrap_or(defaults.login_path),
            booking_path: get("BOOKING_PATH").unwrap_or(defaults.booking_path),
        })
    }

    pub fn is_supported(&self, currency: Currency) -> bool {
        self.supported_currencies.contains(&currency)
    }

    pub fn urls(&self) -> CheckoutUrls {
        CheckoutUrls::new(&self.site_url)
    }

    /// Builder: set the site URL
    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = url.into();
        self
    }

    /// Builder: set the admission budget
    pub fn with_rate_limits(mut self, per_minute: i64, per_hour: i64) -> Self {
        self.rate_limits = RateLimits::new(per_minute, per_hour);
        self
    }

    /// Builder: toggle live price verification
    pub fn with_price_verification(mut self, enabled: bool) -> Self {
        self.verify_prices = enabled;
        self
    }
}

fn parse_number(value: Option<String>, key: &'static str, default: i64) -> Result<i64, ConfigError> {
    match value {
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::new(key, format!("expected a positive integer, got '{}'", raw))),
        },
        None => Ok(default),
    }
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
