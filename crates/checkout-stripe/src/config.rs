//! # Stripe Configuration
//!
//! Configuration management for the Stripe integration.
//! The secret key is loaded from the environment.

use checkout_core::ProcessorError;
use std::env;

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";
const DEFAULT_API_VERSION: &str = "2024-12-18.acacia";

/// Stripe API configuration
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// API version
    pub api_version: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[redacted]")
            .field("api_base_url", &self.api_base_url)
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `STRIPE_SECRET_KEY`
    ///
    /// Optional:
    /// - `STRIPE_API_BASE_URL`
    /// - `STRIPE_API_VERSION`
    pub fn from_env() -> Result<Self, ProcessorError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let secret_key = env::var("STRIPE_SECRET_KEY").map_err(|_| {
            ProcessorError::Configuration("STRIPE_SECRET_KEY not set".to_string())
        })?;
        validate_secret_key(&secret_key)?;

        let mut config = Self::new(secret_key);
        if let Ok(url) = env::var("STRIPE_API_BASE_URL") {
            config = config.with_api_base_url(url);
        }
        if let Ok(version) = env::var("STRIPE_API_VERSION") {
            config.api_version = version;
        }
        Ok(config)
    }

    /// Create config with an explicit key (for testing)
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_secs: 30,
        }
    }

    /// Check if using test keys
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_")
    }

    /// Check if using live keys
    pub fn is_live_mode(&self) -> bool {
        self.secret_key.starts_with("sk_live_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

fn validate_secret_key(key: &str) -> Result<(), ProcessorError> {
    if !key.starts_with("sk_test_") && !key.starts_with("sk_live_") {
        return Err(ProcessorError::Configuration(
            "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
        ));
    }
    Ok(())
}
