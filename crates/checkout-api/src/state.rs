//! # Application State
//!
//! Shared state for the Axum application.
//! Holds the server configuration, the bearer-token verifier and the
//! checkout orchestrator with its store and payment processor.

use crate::auth::JwtAuth;
use checkout_core::{BoxedPaymentProcessor, BoxedStore, CheckoutConfig, CheckoutSessionBuilder};
use checkout_store::{MemoryStore, PgStore};
use checkout_stripe::StripeClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Invalid or missing server setting
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Postgres connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
    /// Catalog file for the in-memory store
    pub catalog_path: Option<PathBuf>,
    /// CORS origins; empty means any origin
    pub allowed_origins: Vec<String>,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    /// Read the client IP from proxy headers; only set behind a proxy that
    /// overwrites them
    pub trust_proxy_headers: bool,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, AppConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| AppConfigError::Invalid {
                key: "PORT",
                message: format!("expected a port number, got '{}'", raw),
            })?,
            None => 8080,
        };

        let allowed_origins = match get("ALLOWED_ORIGINS").as_deref() {
            None | Some("*") => Vec::new(),
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database_url: get("DATABASE_URL"),
            catalog_path: get("CATALOG_PATH").map(PathBuf::from),
            allowed_origins,
            jwt_secret: get("JWT_SECRET").ok_or(AppConfigError::Missing("JWT_SECRET"))?,
            trust_proxy_headers: matches!(
                get("TRUST_PROXY_HEADERS").as_deref(),
                Some("1" | "true" | "yes")
            ),
            log_format,
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<SocketAddr, AppConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppConfigError::Invalid {
                key: "HOST",
                message: format!("{}", e),
            })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<JwtAuth>,
    pub checkout: CheckoutSessionBuilder,
}

impl AppState {
    /// Build the production state: Postgres or in-memory store, Stripe processor
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let checkout_config = CheckoutConfig::from_env()?;

        let store: BoxedStore = match &config.database_url {
            Some(url) => {
                let store = PgStore::connect(url)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
                store
                    .migrate()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
                info!("Using Postgres store");
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory store");
                Arc::new(load_memory_store(config.catalog_path.as_ref())?)
            }
        };

        let processor: BoxedPaymentProcessor = Arc::new(
            StripeClient::from_env()
                .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?,
        );

        Ok(Self::with_parts(config, checkout_config, store, processor))
    }

    /// Assemble state from already-built collaborators
    pub fn with_parts(
        config: AppConfig,
        checkout_config: CheckoutConfig,
        store: BoxedStore,
        processor: BoxedPaymentProcessor,
    ) -> Self {
        let auth = JwtAuth::new(&config.jwt_secret);
        let checkout = CheckoutSessionBuilder::new(Arc::new(checkout_config), store, processor);

        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            checkout,
        }
    }
}

/// Load the in-memory catalog from `path`, or probe the usual locations
fn load_memory_store(path: Option<&PathBuf>) -> anyhow::Result<MemoryStore> {
    if let Some(path) = path {
        return Ok(MemoryStore::load(path)?);
    }

    let config_paths = [
        "config/catalog.toml",
        "../config/catalog.toml",
        "../../config/catalog.toml",
    ];

    for path in config_paths {
        if std::path::Path::new(path).exists() {
            return Ok(MemoryStore::load(path)?);
        }
    }

    warn!("No catalog found, using empty catalog");
    Ok(MemoryStore::new())
}
