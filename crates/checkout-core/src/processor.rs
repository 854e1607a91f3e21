//! # Payment Processor Trait
//!
//! The seam between the checkout core and the external payment processor.
//! The Stripe implementation lives in `checkout-stripe`; tests use
//! `testing::MockProcessor`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentProcessor (trait)                   │
//! │  ├── retrieve_customer() / find_customer_by_user()          │
//! │  ├── create_customer()                                      │
//! │  ├── retrieve_price()                                       │
//! │  └── create_checkout_session()                              │
//! └─────────────────────────────────────────────────────────────┘
//!                  ▲                             ▲
//!          ┌───────┴───────┐             ┌───────┴───────┐
//!          │ StripeClient  │             │ MockProcessor │
//!          └───────────────┘             └───────────────┘
//! ```

use crate::catalog::PriceInterval;
use crate::session::{CheckoutSession, SessionParams};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors from processor calls
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The processor returned an API error
    #[error("Processor API error [{status}]: {message}")]
    Api { status: u16, message: String },

    /// Network/HTTP error talking to the processor
    #[error("Network error: {0}")]
    Network(String),

    /// Unexpected response body
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Missing or invalid keys
    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// A customer record held by the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl ProcessorCustomer {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            deleted: false,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Parameters for creating a customer
#[derive(Debug, Clone, PartialEq)]
pub struct NewCustomer {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub idempotency_key: String,
}

impl NewCustomer {
    /// Idempotency key is derived from the user id and email so concurrent
    /// first purchases converge on the same customer, while a changed email
    /// never reuses a key with different parameters.
    pub fn for_user(user_id: Uuid, email: Option<String>) -> Self {
        let idempotency_key = customer_idempotency_key(user_id, email.as_deref());
        Self {
            user_id,
            email,
            idempotency_key,
        }
    }

    /// Same parameters under a fresh key, for when the key replayed a
    /// customer that has since been deleted.
    pub fn superseding(mut self, dead_customer_id: &str) -> Self {
        let digest = Sha256::digest(format!("{}:{}", self.idempotency_key, dead_customer_id));
        self.idempotency_key = format!("customer-{}", hex::encode(digest));
        self
    }
}

/// `customer-<sha256(user_id ":" email)>`
pub fn customer_idempotency_key(user_id: Uuid, email: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(email.unwrap_or_default().as_bytes());
    format!("customer-{}", hex::encode(hasher.finalize()))
}

/// The processor's live record for a price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub id: String,
    /// Lowercase ISO code
    pub currency: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Recurring interval ("month", "year", ...), absent for one-time prices
    #[serde(default)]
    pub recurring_interval: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PriceRecord {
    pub fn one_time(id: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            currency: currency.into(),
            active: true,
            recurring_interval: None,
        }
    }

    pub fn recurring(id: impl Into<String>, currency: impl Into<String>, interval: PriceInterval) -> Self {
        Self {
            id: id.into(),
            currency: currency.into(),
            active: true,
            recurring_interval: Some(interval.processor_interval().to_string()),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring_interval.is_some()
    }

    pub fn interval(&self) -> Option<PriceInterval> {
        self.recurring_interval
            .as_deref()
            .and_then(PriceInterval::from_processor)
    }
}

/// Core trait for payment processor implementations.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Fetch a customer. `Ok(None)` when the processor does not know the id.
    async fn retrieve_customer(&self, customer_id: &str) -> ProcessorResult<Option<ProcessorCustomer>>;

    /// Find a live customer tagged with `metadata.user_id`.
    async fn find_customer_by_user(&self, user_id: Uuid) -> ProcessorResult<Option<ProcessorCustomer>>;

    /// Create a customer carrying the user id in its metadata.
    async fn create_customer(&self, customer: &NewCustomer) -> ProcessorResult<ProcessorCustomer>;

    /// Fetch a price. `Ok(None)` when the processor does not know the id.
    async fn retrieve_price(&self, price_id: &str) -> ProcessorResult<Option<PriceRecord>>;

    /// Create a hosted checkout session and return its redirect URL.
    async fn create_checkout_session(&self, params: &SessionParams) -> ProcessorResult<CheckoutSession>;
}

/// Shared, dynamically dispatched processor
pub type BoxedPaymentProcessor = Arc<dyn PaymentProcessor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_idempotency_key_is_stable() {
        let user = Uuid::new_v4();
        let key = customer_idempotency_key(user, Some("a@example.ch"));

        assert_eq!(key, customer_idempotency_key(user, Some("a@example.ch")));
        assert_ne!(key, customer_idempotency_key(Uuid::new_v4(), Some("a@example.ch")));
        assert!(key.starts_with("customer-"));
        assert_eq!(key.len(), "customer-".len() + 64);
    }

    #[test]
    fn test_changed_email_changes_key() {
        let user = Uuid::new_v4();
        let before = NewCustomer::for_user(user, Some("old@example.ch".into()));
        let after = NewCustomer::for_user(user, Some("new@example.ch".into()));

        assert_ne!(before.idempotency_key, after.idempotency_key);
        assert_ne!(
            NewCustomer::for_user(user, None).idempotency_key,
            before.idempotency_key
        );
    }

    #[test]
    fn test_superseding_key() {
        let params = NewCustomer::for_user(Uuid::new_v4(), None);
        let original = params.idempotency_key.clone();
        let fresh = params.clone().superseding("cus_dead");

        assert_ne!(fresh.idempotency_key, original);
        assert_eq!(fresh.idempotency_key, params.superseding("cus_dead").idempotency_key);
        assert!(fresh.idempotency_key.starts_with("customer-"));
    }

    #[test]
    fn test_price_record_interval() {
        let monthly = PriceRecord::recurring("price_1", "chf", PriceInterval::Monthly);
        assert!(monthly.is_recurring());
        assert_eq!(monthly.interval(), Some(PriceInterval::Monthly));

        let once = PriceRecord::one_time("price_2", "eur");
        assert!(!once.is_recurring());
        assert_eq!(once.interval(), None);
    }
}
