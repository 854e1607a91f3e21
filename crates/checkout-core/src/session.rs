//! # Checkout Session Types
//!
//! The validated checkout request, the parameters handed to the payment
//! processor, and the session/outcome relayed back to the caller.

use crate::catalog::{Currency, ItemKind, PriceInterval};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Raw checkout request body.
///
/// Unknown fields are rejected before any business logic runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Reference to exactly one catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: Uuid,
}

/// Checkout mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    /// One-time payment
    Payment,
    /// Recurring subscription
    Subscription,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Payment => "payment",
            CheckoutMode::Subscription => "subscription",
        }
    }
}

impl Default for CheckoutMode {
    fn default() -> Self {
        CheckoutMode::Payment
    }
}

/// Input for creating a processor-side checkout session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionParams {
    pub customer_id: String,
    pub price_id: String,
    pub mode: CheckoutMode,
    pub success_url: String,
    pub cancel_url: String,
    /// Our user id, echoed back by the processor
    pub client_reference_id: String,
    pub allow_promotion_codes: bool,
    /// Reconciliation data for the webhook handler
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

/// A checkout session created by the payment processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Processor's session ID
    pub session_id: String,

    /// URL to redirect the customer to
    pub checkout_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CheckoutSession {
    pub fn new(session_id: impl Into<String>, checkout_url: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            checkout_url: checkout_url.into(),
            expires_at: None,
        }
    }
}

/// Successful checkout result returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutOutcome {
    pub checkout_url: String,
    pub session_id: String,
    pub item_type: ItemKind,
    pub item_id: Uuid,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<PriceInterval>,
}

/// Success and cancel URLs for hosted checkout
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the site (e.g., "https://example.ch")
    pub base_url: String,
    pub success_path: String,
    pub cancel_path: String,
}

/// Placeholder the processor replaces with the real session id
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_path: "/checkout/success".to_string(),
            cancel_path: "/checkout/cancel".to_string(),
        }
    }

    /// Success URL with the session id placeholder
    pub fn success_url(&self, kind: ItemKind) -> String {
        format!(
            "{}{}?session_id={}&type={}",
            self.base_url,
            self.success_path,
            SESSION_ID_PLACEHOLDER,
            kind.as_str()
        )
    }

    pub fn cancel_url(&self, kind: ItemKind, item_id: Uuid) -> String {
        format!(
            "{}{}?type={}&id={}",
            self.base_url,
            self.cancel_path,
            kind.as_str(),
            item_id
        )
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}
