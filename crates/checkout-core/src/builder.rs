//! # Checkout Session Builder
//!
//! Orchestrates one checkout request:
//!
//! ```text
//! Validating ─► Admitted ─► PriceResolved ─► CustomerResolved ─► SessionCreated
//!      │            │              │                  │                  │
//!      └────────────┴──────────────┴──── Rejected ────┴──────────────────┘
//! ```
//!
//! Every rejection is written to the error log, tagged with the stage it
//! happened in, before it is returned.

use crate::admission::AdmissionController;
use crate::catalog::{CatalogItem, Currency, ItemKind, PriceInterval};
use crate::config::CheckoutConfig;
use crate::customer::CustomerIdentityResolver;
use crate::error::{CheckoutError, CheckoutResult};
use crate::pricing::{PriceResolver, ResolvedPrice};
use crate::processor::BoxedPaymentProcessor;
use crate::reporter::{ErrorReporter, RequestContext};
use crate::session::{CheckoutMode, CheckoutOutcome, CheckoutRequest, ItemRef, SessionParams};
use crate::store::{BoxedStore, IdentifierType, UserProfile};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Progress of a checkout request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStage {
    Validating,
    Admitted,
    PriceResolved,
    CustomerResolved,
    SessionCreated,
}

impl CheckoutStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStage::Validating => "validating",
            CheckoutStage::Admitted => "admitted",
            CheckoutStage::PriceResolved => "price_resolved",
            CheckoutStage::CustomerResolved => "customer_resolved",
            CheckoutStage::SessionCreated => "session_created",
        }
    }
}

/// A request that passed shape validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub item: ItemRef,
    pub interval: Option<PriceInterval>,
    /// Explicitly requested currency
    pub currency: Option<Currency>,
}

impl ValidatedRequest {
    /// Check field combinations and value sets
    pub fn parse(request: CheckoutRequest, config: &CheckoutConfig) -> CheckoutResult<Self> {
        let item = match (request.product_id, request.service_id) {
            (Some(_), Some(_)) => {
                return Err(CheckoutError::validation(
                    "Provide either product_id or service_id, not both",
                ))
            }
            (None, None) => {
                return Err(CheckoutError::validation(
                    "Either product_id or service_id is required",
                ))
            }
            (Some(id), None) => ItemRef {
                kind: ItemKind::Product,
                id,
            },
            (None, Some(id)) => ItemRef {
                kind: ItemKind::Service,
                id,
            },
        };

        let interval = request
            .interval
            .as_deref()
            .map(str::parse::<PriceInterval>)
            .transpose()
            .map_err(CheckoutError::Validation)?;

        let currency = match request.currency.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(code) => {
                let currency = code.parse::<Currency>().map_err(CheckoutError::Validation)?;
                if !config.is_supported(currency) {
                    return Err(CheckoutError::validation(format!(
                        "Unsupported currency: {}",
                        currency
                    )));
                }
                Some(currency)
            }
        };

        Ok(Self {
            item,
            interval,
            currency,
        })
    }
}

/// Top-level checkout orchestrator
#[derive(Clone)]
pub struct CheckoutSessionBuilder {
    config: Arc<CheckoutConfig>,
    store: BoxedStore,
    processor: BoxedPaymentProcessor,
    admission: AdmissionController,
    prices: PriceResolver,
    customers: CustomerIdentityResolver,
    reporter: ErrorReporter,
}

impl CheckoutSessionBuilder {
    pub fn new(config: Arc<CheckoutConfig>, store: BoxedStore, processor: BoxedPaymentProcessor) -> Self {
        let reporter = ErrorReporter::new(store.clone(), config.function_name.clone());
        let admission = AdmissionController::new(store.clone(), config.rate_limits, reporter.clone());
        let prices = PriceResolver::new(processor.clone(), config.default_currency, config.verify_prices);
        let customers = CustomerIdentityResolver::new(store.clone(), processor.clone());

        Self {
            config,
            store,
            processor,
            admission,
            prices,
            customers,
            reporter,
        }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// Run a checkout for an authenticated caller. `body` is the raw JSON payload.
    #[instrument(skip_all, fields(user_id = ?ctx.user_id))]
    pub async fn run(&self, ctx: &RequestContext, body: &[u8]) -> CheckoutResult<CheckoutOutcome> {
        let mut stage = CheckoutStage::Validating;
        let result = self.execute(ctx, body, &mut stage).await;

        match &result {
            Ok(outcome) => info!(
                session_id = %outcome.session_id,
                item_type = %outcome.item_type,
                item_id = %outcome.item_id,
                "Checkout session created"
            ),
            Err(e) => {
                self.reporter
                    .report_error(ctx, e, json!({ "stage": stage.as_str() }))
                    .await;
            }
        }

        result
    }

    /// Turn an authentication failure into the caller's response.
    ///
    /// Anonymous callers are still admitted by IP, so an exhausted IP budget
    /// is answered with a rate-limit error instead of the auth error.
    pub async fn reject_unauthenticated(&self, ctx: &RequestContext, err: CheckoutError) -> CheckoutError {
        if let Some(ip) = ctx.ip_address.as_deref() {
            let decision = self
                .admission
                .admit(ctx, ip, IdentifierType::Ip, &self.config.function_name)
                .await;
            if let Err(limited) = decision.into_result() {
                self.reporter
                    .report_error(ctx, &limited, json!({ "stage": "authenticating" }))
                    .await;
                return limited;
            }
        }

        let err = match err {
            CheckoutError::Unauthorized { message, redirect } => CheckoutError::Unauthorized {
                message,
                redirect: redirect.or_else(|| Some(self.config.login_path.clone())),
            },
            other => other,
        };
        self.reporter
            .report_error(ctx, &err, json!({ "stage": "authenticating" }))
            .await;
        err
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        body: &[u8],
        stage: &mut CheckoutStage,
    ) -> CheckoutResult<CheckoutOutcome> {
        let user_id = ctx
            .user_id
            .ok_or_else(|| CheckoutError::unauthorized("Authentication required"))?;

        // Admission counts every authenticated call, well-formed or not
        self.admission
            .admit(ctx, &user_id.to_string(), IdentifierType::User, &self.config.function_name)
            .await
            .into_result()?;

        let request: CheckoutRequest = serde_json::from_slice(body)
            .map_err(|e| CheckoutError::validation(format!("Invalid request body: {}", e)))?;
        let request = ValidatedRequest::parse(request, &self.config)?;
        *stage = CheckoutStage::Admitted;

        let item = self.load_item(request.item).await?;
        let profile = self.store.find_profile(user_id).await?;
        let currency = request
            .currency
            .or_else(|| profile.as_ref().and_then(UserProfile::currency))
            .filter(|c| self.config.is_supported(*c))
            .unwrap_or(self.config.default_currency);

        let price = self.prices.resolve(&item, currency, request.interval).await?;
        *stage = CheckoutStage::PriceResolved;

        let email = ctx
            .email
            .clone()
            .or_else(|| profile.as_ref().and_then(|p| p.email.clone()));
        let existing = profile.as_ref().and_then(|p| p.stripe_customer_id.as_deref());
        let customer = self
            .customers
            .resolve(user_id, email.as_deref(), existing)
            .await?;
        *stage = CheckoutStage::CustomerResolved;

        let mode = self.checkout_mode(&item, &price).await;
        let interval = match mode {
            CheckoutMode::Subscription => request
                .interval
                .or_else(|| price.record.as_ref().and_then(|r| r.interval())),
            CheckoutMode::Payment => None,
        };

        let params = self.session_params(user_id, &item, &price, customer.customer_id, mode, interval);
        let session = self.processor.create_checkout_session(&params).await?;
        *stage = CheckoutStage::SessionCreated;

        Ok(CheckoutOutcome {
            checkout_url: session.checkout_url,
            session_id: session.session_id,
            item_type: item.kind(),
            item_id: item.id(),
            currency: price.currency,
            interval,
        })
    }

    async fn load_item(&self, item: ItemRef) -> CheckoutResult<CatalogItem> {
        let not_found = || CheckoutError::ItemNotFound {
            kind: item.kind.as_str(),
            id: item.id.to_string(),
        };

        let found = self
            .store
            .find_item(item.kind, item.id)
            .await?
            .ok_or_else(not_found)?;
        if !found.is_active() {
            return Err(not_found());
        }

        if let CatalogItem::Service(service) = &found {
            if !service.payment_method.accepts_card() {
                return Err(CheckoutError::BankTransferOnly {
                    service_id: service.id.to_string(),
                    redirect: Some(self.config.booking_path.clone()),
                });
            }
        }

        Ok(found)
    }

    /// Subscription if the catalog says so or the price itself recurs
    async fn checkout_mode(&self, item: &CatalogItem, price: &ResolvedPrice) -> CheckoutMode {
        let recurring = match price.is_recurring() {
            Some(recurring) => Some(recurring),
            None => match self.processor.retrieve_price(&price.price_id).await {
                Ok(record) => record.map(|r| r.is_recurring()),
                Err(e) => {
                    warn!(price_id = %price.price_id, "Price lookup for mode check failed: {}", e);
                    None
                }
            },
        };

        let subscription = item.is_subscription();
        if let Some(recurring) = recurring {
            if recurring != subscription {
                warn!(
                    item_id = %item.id(),
                    price_id = %price.price_id,
                    pricing_type = item.pricing_type().as_str(),
                    recurring,
                    "Pricing type and price recurrence disagree"
                );
            }
        }

        if subscription || recurring == Some(true) {
            CheckoutMode::Subscription
        } else {
            CheckoutMode::Payment
        }
    }

    fn session_params(
        &self,
        user_id: Uuid,
        item: &CatalogItem,
        price: &ResolvedPrice,
        customer_id: String,
        mode: CheckoutMode,
        interval: Option<PriceInterval>,
    ) -> SessionParams {
        let urls = self.config.urls();
        let kind = item.kind();

        let mut metadata = BTreeMap::new();
        metadata.insert("item_type".to_string(), kind.as_str().to_string());
        metadata.insert("item_id".to_string(), item.id().to_string());
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("currency".to_string(), price.currency.code().to_string());
        metadata.insert("price_id".to_string(), price.price_id.clone());
        if let Some(interval) = interval {
            metadata.insert("interval".to_string(), interval.as_str().to_string());
        }

        SessionParams {
            customer_id,
            price_id: price.price_id.clone(),
            mode,
            success_url: urls.success_url(kind),
            cancel_url: urls.cancel_url(kind, item.id()),
            client_reference_id: user_id.to_string(),
            allow_promotion_codes: self.config.allow_promotion_codes,
            metadata,
            idempotency_key: format!("checkout-{}", Uuid::new_v4()),
        }
    }
}
