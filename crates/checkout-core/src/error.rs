//! # Checkout Error Types
//!
//! Typed error handling for the checkout service.
//! Every component returns `Result<T, CheckoutError>`; a single adapter at the
//! HTTP edge turns the final error into a response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::processor::ProcessorError;
use crate::store::StoreError;

/// Failure categories recorded in the error log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Malformed or contradictory input
    Validation,
    /// Missing or invalid caller identity
    Auth,
    /// Transport failure talking to a collaborator
    Network,
    /// The payment processor rejected a call
    StripeApi,
    /// Storage unavailable or failing
    Database,
    /// Anything unexpected
    Other,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Validation => "validation",
            ErrorType::Auth => "auth",
            ErrorType::Network => "network",
            ErrorType::StripeApi => "stripe_api",
            ErrorType::Database => "database",
            ErrorType::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for all checkout operations
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Invalid request data (message is safe to show the caller)
    #[error("{0}")]
    Validation(String),

    /// Service only accepts offline payment
    #[error("This service can only be paid by bank transfer. Please use the booking request flow instead.")]
    BankTransferOnly {
        service_id: String,
        redirect: Option<String>,
    },

    /// Missing, malformed or expired credentials
    #[error("{message}")]
    Unauthorized {
        message: String,
        redirect: Option<String>,
    },

    /// Catalog item does not exist or is inactive
    #[error("{kind} not found: {id}")]
    ItemNotFound { kind: &'static str, id: String },

    /// Caller exhausted its admission budget
    #[error("Too many requests. Please try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    /// No payable price could be resolved for the item
    #[error("No price configured for item {item_id} in {currency}")]
    PriceNotConfigured { item_id: String, currency: String },

    /// Payment processor rejected the call
    #[error("Processor error: {0}")]
    Processor(String),

    /// Network failure talking to a collaborator
    #[error("Network error: {0}")]
    Network(String),

    /// Storage failure
    #[error("Database error: {0}")]
    Database(String),

    /// Catch-all for unexpected failures
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    pub fn validation(message: impl Into<String>) -> Self {
        CheckoutError::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        CheckoutError::Unauthorized {
            message: message.into(),
            redirect: None,
        }
    }

    /// The error log category for this error
    pub fn error_type(&self) -> ErrorType {
        match self {
            CheckoutError::Validation(_)
            | CheckoutError::BankTransferOnly { .. }
            | CheckoutError::ItemNotFound { .. }
            | CheckoutError::RateLimited { .. } => ErrorType::Validation,
            CheckoutError::Unauthorized { .. } => ErrorType::Auth,
            CheckoutError::Processor(_) => ErrorType::StripeApi,
            CheckoutError::Network(_) => ErrorType::Network,
            CheckoutError::Database(_) => ErrorType::Database,
            CheckoutError::PriceNotConfigured { .. } | CheckoutError::Internal(_) => {
                ErrorType::Other
            }
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CheckoutError::Validation(_) | CheckoutError::BankTransferOnly { .. } => 400,
            CheckoutError::Unauthorized { .. } => 401,
            CheckoutError::ItemNotFound { .. } => 404,
            CheckoutError::RateLimited { .. } => 429,
            CheckoutError::PriceNotConfigured { .. }
            | CheckoutError::Processor(_)
            | CheckoutError::Network(_)
            | CheckoutError::Database(_)
            | CheckoutError::Internal(_) => 500,
        }
    }

    /// Message that may be shown to the caller.
    ///
    /// Server-side failures collapse to generic text; the detail only goes to the error log.
    pub fn public_message(&self) -> String {
        match self {
            CheckoutError::Validation(_)
            | CheckoutError::BankTransferOnly { .. }
            | CheckoutError::Unauthorized { .. }
            | CheckoutError::RateLimited { .. } => self.to_string(),
            CheckoutError::ItemNotFound { kind, .. } => format!("{} not found", capitalize(kind)),
            CheckoutError::PriceNotConfigured { .. } => {
                "This item is not available for purchase in the selected currency.".to_string()
            }
            CheckoutError::Processor(_)
            | CheckoutError::Network(_)
            | CheckoutError::Database(_)
            | CheckoutError::Internal(_) => {
                "Unable to create checkout session. Please try again later.".to_string()
            }
        }
    }

    /// Where the caller should be sent instead: login for auth failures,
    /// the offline booking flow for bank-transfer-only services
    pub fn redirect(&self) -> Option<&str> {
        match self {
            CheckoutError::Unauthorized { redirect, .. }
            | CheckoutError::BankTransferOnly { redirect, .. } => redirect.as_deref(),
            _ => None,
        }
    }

    /// Seconds the caller should wait before retrying, for rate-limit denials
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            CheckoutError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        CheckoutError::Database(err.to_string())
    }
}

impl From<ProcessorError> for CheckoutError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Network(msg) => CheckoutError::Network(msg),
            ProcessorError::Configuration(msg) => CheckoutError::Internal(msg),
            other => CheckoutError::Processor(other.to_string()),
        }
    }
}

/// Result type alias for checkout operations
pub type CheckoutResult<T> = Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CheckoutError::validation("bad").status_code(), 400);
        assert_eq!(CheckoutError::unauthorized("no token").status_code(), 401);
        assert_eq!(
            CheckoutError::ItemNotFound {
                kind: "product",
                id: "x".into()
            }
            .status_code(),
            404
        );
        assert_eq!(
            CheckoutError::RateLimited {
                retry_after_secs: 12
            }
            .status_code(),
            429
        );
        assert_eq!(CheckoutError::Processor("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_error_types() {
        assert_eq!(
            CheckoutError::ItemNotFound {
                kind: "service",
                id: "x".into()
            }
            .error_type(),
            ErrorType::Validation
        );
        assert_eq!(
            CheckoutError::Processor("declined".into()).error_type(),
            ErrorType::StripeApi
        );
        assert_eq!(
            CheckoutError::from(StoreError::Unavailable("down".into())).error_type(),
            ErrorType::Database
        );
        assert_eq!(
            CheckoutError::from(ProcessorError::Network("timeout".into())).error_type(),
            ErrorType::Network
        );
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = CheckoutError::Processor("No such price: 'price_123' (param: line_items)".into());
        assert!(!err.public_message().contains("price_123"));

        let err = CheckoutError::PriceNotConfigured {
            item_id: "abc".into(),
            currency: "EUR".into(),
        };
        assert!(!err.public_message().contains("abc"));

        let err = CheckoutError::ItemNotFound {
            kind: "product",
            id: "abc".into(),
        };
        assert_eq!(err.public_message(), "Product not found");
    }

    #[test]
    fn test_retry_after() {
        let err = CheckoutError::RateLimited {
            retry_after_secs: 42,
        };
        assert_eq!(err.retry_after(), Some(42));
        assert_eq!(CheckoutError::validation("x").retry_after(), None);
    }
}
