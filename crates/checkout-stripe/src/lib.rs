//! # checkout-stripe
//!
//! Stripe implementation of the `PaymentProcessor` trait for checkout-gate-rs.
//!
//! Covers the calls the checkout flow needs:
//!
//! - **Customers**: retrieve, search by `metadata.user_id`, create with an
//!   idempotency key derived from the user id
//! - **Prices**: retrieve for currency/interval verification
//! - **Checkout Sessions**: hosted checkout for one pre-configured price
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use checkout_stripe::StripeClient;
//! use checkout_core::PaymentProcessor;
//!
//! // Create client from environment
//! let stripe = StripeClient::from_env()?;
//!
//! // Create checkout session
//! let session = stripe.create_checkout_session(&params).await?;
//!
//! // Redirect user to session.checkout_url
//! ```

pub mod client;
pub mod config;

// Re-exports
pub use client::StripeClient;
pub use config::StripeConfig;
