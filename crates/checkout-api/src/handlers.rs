//! # Request Handlers
//!
//! Axum request handlers for the checkout API.

use crate::auth::{client_ip, request_snapshot};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    response::IntoResponse,
    Json,
};
use checkout_core::{CheckoutError, CheckoutOutcome, RequestContext};
use std::net::SocketAddr;
use tracing::{debug, instrument};

/// Largest accepted checkout body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "checkout-gate",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Create a checkout session for the bearer of the request's token
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn create_checkout(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<CheckoutOutcome>, ApiError> {
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&parts.headers, peer, state.config.trust_proxy_headers);

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => {
            let ctx = RequestContext::new(
                ip,
                request_snapshot(&parts.method, parts.uri.path(), &parts.headers, &[]),
            );
            let err = CheckoutError::validation("Request body too large");
            state
                .checkout
                .reporter()
                .report_error(&ctx, &err, serde_json::json!({ "stage": "reading_body" }))
                .await;
            return Err(err.into());
        }
    };

    let ctx = RequestContext::new(
        ip,
        request_snapshot(&parts.method, parts.uri.path(), &parts.headers, &body),
    );

    let ctx = match state.auth.authenticate(&parts.headers) {
        Ok(user) => {
            debug!(user_id = %user.user_id, "Authenticated caller");
            ctx.with_user(user.user_id, user.email)
        }
        Err(err) => return Err(state.checkout.reject_unauthenticated(&ctx, err).await.into()),
    };

    let outcome = state.checkout.run(&ctx, &body).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_body() {
        let response = health().await.into_response();
        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "checkout-gate");
    }
}
