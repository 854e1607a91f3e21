//! API error responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use checkout_core::CheckoutError;
use serde::Serialize;

/// Adapter from the core error to an HTTP response
#[derive(Debug)]
pub struct ApiError(pub CheckoutError);

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        Self(err)
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&CheckoutError> for ErrorResponse {
    fn from(err: &CheckoutError) -> Self {
        Self {
            error: err.public_message(),
            redirect: err.redirect().map(str::to_string),
            retry_after: err.retry_after(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from(&self.0);
        let retry_after = body.retry_after;

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_response() {
        let response = ApiError(CheckoutError::RateLimited {
            retry_after_secs: 17,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "17");
    }

    #[test]
    fn test_unauthorized_body_carries_redirect() {
        let err = CheckoutError::Unauthorized {
            message: "Missing authorization header".into(),
            redirect: Some("/login".into()),
        };
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();

        assert_eq!(body["redirect"], "/login");
        assert!(body.get("retry_after").is_none());
        assert_eq!(ApiError(err).into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_bank_transfer_body_points_at_booking() {
        let err = CheckoutError::BankTransferOnly {
            service_id: "svc".into(),
            redirect: Some("/booking".into()),
        };
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();

        assert_eq!(body["redirect"], "/booking");
        assert!(body["error"].as_str().unwrap().contains("bank transfer"));
        assert_eq!(ApiError(err).into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let err = CheckoutError::Database("relation \"profiles\" does not exist".into());
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();

        assert!(!body["error"].as_str().unwrap().contains("profiles"));
        assert_eq!(
            ApiError(err).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
