//! # Routes
//!
//! Axum router configuration for the checkout API.

use crate::error::ApiError;
use crate::handlers;
use crate::state::AppState;
use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Response},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use checkout_core::{CheckoutError, ErrorReporter, ErrorType, RequestContext};
use serde_json::json;
use std::any::Any;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::{CatchPanicLayer, ResponseForPanic},
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

/// Create the main application router
///
/// Routes:
/// - GET  /health - Health check
/// - POST /functions/v1/create-checkout - Create checkout session
/// - POST /api/v1/checkout - Same handler, versioned API path
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let catch_panic = CatchPanicLayer::custom(ReportPanic::new(state.checkout.reporter().clone()));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/functions/v1/create-checkout", post(handlers::create_checkout))
        .route("/api/v1/checkout", post(handlers::create_checkout))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(catch_panic)
                .layer(cors),
        )
        .with_state(state)
}

/// CORS for browser callers; an empty origin list allows any origin
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("apikey"),
            header::HeaderName::from_static("x-client-info"),
        ]);

    if allowed_origins.is_empty() {
        return layer.allow_origin(AnyOrigin);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// Turns a handler panic into the generic 500 body and an `other` entry in
/// the error log
#[derive(Clone)]
pub struct ReportPanic {
    reporter: ErrorReporter,
}

impl ReportPanic {
    pub fn new(reporter: ErrorReporter) -> Self {
        Self { reporter }
    }
}

impl ResponseForPanic for ReportPanic {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        let message = if let Some(s) = err.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = err.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(panic = %message, "Request handler panicked");

        // The log write is async; the response is not held for it
        let reporter = self.reporter.clone();
        let report_message = message.clone();
        tokio::spawn(async move {
            reporter
                .report(
                    &RequestContext::default(),
                    ErrorType::Other,
                    format!("Handler panicked: {}", report_message),
                    json!({ "stage": "panic" }),
                )
                .await;
        });

        ApiError(CheckoutError::Internal(message)).into_response()
    }
}
