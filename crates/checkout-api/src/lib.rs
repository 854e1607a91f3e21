//! # checkout-api
//!
//! HTTP API layer for checkout-gate-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Bearer-token authentication and client IP extraction
//! - The error-to-HTTP adapter for `CheckoutError`
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/functions/v1/create-checkout` | Create checkout session |
//! | POST | `/api/v1/checkout` | Create checkout session |

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use auth::{AuthUser, JwtAuth};
pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppConfig, AppState, LogFormat};
