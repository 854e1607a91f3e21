//! # Checkout Gate
//!
//! Checkout admission and orchestration service.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export STRIPE_SECRET_KEY=sk_test_...
//! export JWT_SECRET=...
//! export DATABASE_URL=postgres://...   # optional, in-memory store otherwise
//!
//! # Run the server
//! checkout-gate
//! ```

use checkout_api::{routes, state::AppState, AppConfig, LogFormat};
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_logging(config.log_format);

    print_banner();

    let state = AppState::new(config).await?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!(
        "Rate limits: {}/minute, {}/hour",
        state.checkout.config().rate_limits.per_minute,
        state.checkout.config().rate_limits.per_hour
    );

    let app = routes::create_router(state);

    info!("Checkout gate starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Checkout: POST http://{}/functions/v1/create-checkout", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
    }
}

fn print_banner() {
    println!(
        r#"
  Checkout Gate
  ━━━━━━━━━━━━━━━━━━━━━━━
  Checkout admission service
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
