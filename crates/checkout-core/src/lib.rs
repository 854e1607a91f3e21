//! # checkout-core
//!
//! Core types and components for the checkout admission service.
//!
//! This crate provides:
//! - `AdmissionController` for per-caller fixed-window rate limiting
//! - `PriceResolver` for currency/interval price selection
//! - `CustomerIdentityResolver` for one processor customer per user
//! - `CheckoutSessionBuilder` orchestrating a whole checkout
//! - `ErrorReporter` writing failures to the error log
//! - `PaymentProcessor` and the store traits the components run against
//! - `CheckoutError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkout_core::{CheckoutConfig, CheckoutSessionBuilder, RequestContext};
//!
//! let builder = CheckoutSessionBuilder::new(Arc::new(CheckoutConfig::from_env()?), store, processor);
//!
//! let ctx = RequestContext::new(Some(ip), snapshot).with_user(user_id, email);
//! let outcome = builder.run(&ctx, br#"{"product_id": "...", "interval": "monthly"}"#).await?;
//!
//! // Redirect user to outcome.checkout_url
//! ```

pub mod admission;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod customer;
pub mod error;
pub mod pricing;
pub mod processor;
pub mod reporter;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports for convenience
pub use admission::{AdmissionController, AdmissionDecision};
pub use builder::{CheckoutSessionBuilder, CheckoutStage, ValidatedRequest};
pub use catalog::{
    Catalog, CatalogItem, Currency, ItemKind, PaymentMethod, PriceInterval, PricingType, Product,
    Service,
};
pub use config::{CheckoutConfig, ConfigError, RateLimits};
pub use customer::{CustomerIdentityResolver, CustomerSource, ResolvedCustomer};
pub use error::{CheckoutError, CheckoutResult, ErrorType};
pub use pricing::{PriceResolver, PriceSource, ResolvedPrice};
pub use processor::{
    customer_idempotency_key, BoxedPaymentProcessor, NewCustomer, PaymentProcessor, PriceRecord,
    ProcessorCustomer, ProcessorError, ProcessorResult,
};
pub use reporter::{ErrorReporter, RequestContext};
pub use session::{
    CheckoutMode, CheckoutOutcome, CheckoutRequest, CheckoutSession, CheckoutUrls, ItemRef,
    SessionParams,
};
pub use store::{
    BoxedStore, CatalogStore, CommerceStore, CounterKey, ErrorLogEntry, ErrorLogStore,
    Granularity, IdentifierType, ProfileStore, PurchaseRecord, PurchaseStore, RateCounterStore,
    StoreError, StoreResult, UserProfile,
};
