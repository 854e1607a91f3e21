//! # Stripe Client
//!
//! `PaymentProcessor` over the Stripe REST API: customers, customer search,
//! prices and Checkout Sessions. Requests are form-encoded; every response
//! body is read as text first so API errors can be logged verbatim.

use crate::config::StripeConfig;
use async_trait::async_trait;
use chrono::DateTime;
use checkout_core::{
    CheckoutMode, CheckoutSession, NewCustomer, PaymentProcessor, PriceRecord, ProcessorCustomer,
    ProcessorError, ProcessorResult, SessionParams,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Stripe API client
pub struct StripeClient {
    config: StripeConfig,
    client: Client,
}

impl StripeClient {
    /// Create a new Stripe client
    pub fn new(config: StripeConfig) -> ProcessorResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProcessorError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> ProcessorResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str, idempotency_key: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
            .header("Idempotency-Key", idempotency_key)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
    }

    /// Send and decode a successful response
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProcessorResult<T> {
        match self.send_optional(request).await? {
            Some(value) => Ok(value),
            None => Err(ProcessorError::Api {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: "Resource not found".to_string(),
            }),
        }
    }

    /// Send and decode; `Ok(None)` for 404
    async fn send_optional<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProcessorResult<Option<T>> {
        let response = request
            .send()
            .await
            .map_err(|e| ProcessorError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProcessorError::Network(e.to_string()))?;

        if status == StatusCode::NOT_FOUND {
            debug!("Stripe returned 404: {}", body);
            return Ok(None);
        }

        if !status.is_success() {
            error!("Stripe API error: status={}, body={}", status, body);

            let message = match serde_json::from_str::<StripeErrorResponse>(&body) {
                Ok(error_response) => error_response.error.message,
                Err(_) => format!("HTTP {}: {}", status, body),
            };
            return Err(ProcessorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ProcessorError::Serialization(format!("Failed to parse Stripe response: {}", e)))
    }
}

/// Form fields for a Checkout Session with one pre-configured price
fn session_form(params: &SessionParams) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".to_string(), params.mode.as_str().to_string()),
        ("customer".to_string(), params.customer_id.clone()),
        ("line_items[0][price]".to_string(), params.price_id.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("success_url".to_string(), params.success_url.clone()),
        ("cancel_url".to_string(), params.cancel_url.clone()),
        ("client_reference_id".to_string(), params.client_reference_id.clone()),
    ];

    if params.allow_promotion_codes {
        form.push(("allow_promotion_codes".to_string(), "true".to_string()));
    }

    for (key, value) in &params.metadata {
        form.push((format!("metadata[{}]", key), value.clone()));
    }

    if params.mode == CheckoutMode::Subscription {
        for (key, value) in &params.metadata {
            form.push((format!("subscription_data[metadata][{}]", key), value.clone()));
        }
    }

    form
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip(self))]
    async fn retrieve_customer(&self, customer_id: &str) -> ProcessorResult<Option<ProcessorCustomer>> {
        let customer: Option<StripeCustomer> = self
            .send_optional(self.get(&format!("/v1/customers/{}", customer_id)))
            .await?;
        Ok(customer.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_customer_by_user(&self, user_id: Uuid) -> ProcessorResult<Option<ProcessorCustomer>> {
        let query = format!("metadata['user_id']:'{}'", user_id);
        let result: Option<StripeList<StripeCustomer>> = self
            .send_optional(
                self.get("/v1/customers/search")
                    .query(&[("query", query.as_str()), ("limit", "10")]),
            )
            .await?;

        Ok(result
            .map(|list| list.data)
            .unwrap_or_default()
            .into_iter()
            .map(ProcessorCustomer::from)
            .find(ProcessorCustomer::is_live))
    }

    #[instrument(skip(self, customer), fields(user_id = %customer.user_id))]
    async fn create_customer(&self, customer: &NewCustomer) -> ProcessorResult<ProcessorCustomer> {
        let mut form: Vec<(String, String)> =
            vec![("metadata[user_id]".to_string(), customer.user_id.to_string())];
        if let Some(email) = &customer.email {
            form.push(("email".to_string(), email.clone()));
        }

        let created: StripeCustomer = self
            .send(self.post("/v1/customers", &customer.idempotency_key).form(&form))
            .await?;

        info!("Created Stripe customer: id={}", created.id);
        Ok(created.into())
    }

    #[instrument(skip(self))]
    async fn retrieve_price(&self, price_id: &str) -> ProcessorResult<Option<PriceRecord>> {
        let price: Option<StripePrice> = self
            .send_optional(self.get(&format!("/v1/prices/{}", price_id)))
            .await?;
        Ok(price.map(Into::into))
    }

    #[instrument(skip(self, params), fields(price_id = %params.price_id, mode = params.mode.as_str()))]
    async fn create_checkout_session(&self, params: &SessionParams) -> ProcessorResult<CheckoutSession> {
        let form = session_form(params);
        debug!("Creating Stripe checkout session: {} fields", form.len());

        let response: StripeCheckoutSessionResponse = self
            .send(
                self.post("/v1/checkout/sessions", &params.idempotency_key)
                    .form(&form),
            )
            .await?;

        let checkout_url = response.url.ok_or_else(|| {
            ProcessorError::Serialization(format!("Session {} has no checkout URL", response.id))
        })?;

        info!(
            "Created Stripe checkout session: id={}, url={}",
            response.id, checkout_url
        );

        let mut session = CheckoutSession::new(response.id, checkout_url);
        session.expires_at = response
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        Ok(session)
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    deleted: bool,
}

impl From<StripeCustomer> for ProcessorCustomer {
    fn from(customer: StripeCustomer) -> Self {
        ProcessorCustomer {
            id: customer.id,
            email: customer.email,
            deleted: customer.deleted,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
    currency: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    recurring: Option<StripeRecurring>,
}

#[derive(Debug, Deserialize)]
struct StripeRecurring {
    interval: String,
}

impl From<StripePrice> for PriceRecord {
    fn from(price: StripePrice) -> Self {
        PriceRecord {
            id: price.id,
            currency: price.currency,
            active: price.active,
            recurring_interval: price.recurring.map(|r| r.interval),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_core::{customer_idempotency_key, PriceInterval};
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> StripeClient {
        let config = StripeConfig::new("sk_test_123").with_api_base_url(server.uri());
        StripeClient::new(config).unwrap()
    }

    fn params(mode: CheckoutMode) -> SessionParams {
        let mut metadata = BTreeMap::new();
        metadata.insert("item_type".to_string(), "product".to_string());
        metadata.insert("item_id".to_string(), "6c1f0b9e-3f5a-4a8e-9a51-2f1f6f0f2d11".to_string());
        SessionParams {
            customer_id: "cus_123".into(),
            price_id: "price_123".into(),
            mode,
            success_url: "https://shop.example.ch/checkout/success?session_id={CHECKOUT_SESSION_ID}".into(),
            cancel_url: "https://shop.example.ch/checkout/cancel".into(),
            client_reference_id: "user-1".into(),
            allow_promotion_codes: true,
            metadata,
            idempotency_key: "checkout-abc".into(),
        }
    }

    #[test]
    fn test_session_form_mirrors_metadata_for_subscriptions() {
        let form = session_form(&params(CheckoutMode::Subscription));
        let has = |k: &str, v: &str| form.iter().any(|(fk, fv)| fk == k && fv == v);

        assert!(has("mode", "subscription"));
        assert!(has("line_items[0][price]", "price_123"));
        assert!(has("metadata[item_type]", "product"));
        assert!(has("subscription_data[metadata][item_type]", "product"));
        assert!(has("allow_promotion_codes", "true"));

        let form = session_form(&params(CheckoutMode::Payment));
        assert!(!form.iter().any(|(k, _)| k.starts_with("subscription_data")));
    }

    #[tokio::test]
    async fn test_create_checkout_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("Authorization", "Bearer sk_test_123"))
            .and(header("Idempotency-Key", "checkout-abc"))
            .and(body_string_contains("customer=cus_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1",
                "expires_at": 1_900_000_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let session = client
            .create_checkout_session(&params(CheckoutMode::Payment))
            .await
            .unwrap();

        assert_eq!(session.session_id, "cs_test_1");
        assert_eq!(session.checkout_url, "https://checkout.stripe.com/c/pay/cs_test_1");
        assert!(session.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "No such price: 'price_123'", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .create_checkout_session(&params(CheckoutMode::Payment))
            .await
            .unwrap_err();

        match err {
            ProcessorError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "No such price: 'price_123'");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retrieve_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/prices/price_month"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "price_month",
                "object": "price",
                "currency": "chf",
                "active": true,
                "recurring": {"interval": "month", "interval_count": 1}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/prices/price_missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"message": "No such price: 'price_missing'"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;

        let price = client.retrieve_price("price_month").await.unwrap().unwrap();
        assert_eq!(price.currency, "chf");
        assert_eq!(price.interval(), Some(PriceInterval::Monthly));

        assert!(client.retrieve_price("price_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retrieve_deleted_customer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/customers/cus_gone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_gone",
                "object": "customer",
                "deleted": true
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let customer = client.retrieve_customer("cus_gone").await.unwrap().unwrap();
        assert!(!customer.is_live());
    }

    #[tokio::test]
    async fn test_find_customer_by_user() {
        let server = MockServer::start().await;
        let user = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/v1/customers/search"))
            .and(query_param("query", format!("metadata['user_id']:'{}'", user)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "search_result",
                "data": [
                    {"id": "cus_old", "deleted": true},
                    {"id": "cus_live", "email": "a@example.ch"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let found = client.find_customer_by_user(user).await.unwrap().unwrap();
        assert_eq!(found.id, "cus_live");
    }

    #[tokio::test]
    async fn test_create_customer_sends_idempotency_key() {
        let server = MockServer::start().await;
        let user = Uuid::new_v4();
        let key = customer_idempotency_key(user, Some("a@example.ch"));
        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .and(header("Idempotency-Key", key.as_str()))
            .and(body_string_contains(format!("metadata%5Buser_id%5D={}", user)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_new",
                "email": "a@example.ch"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let created = client
            .create_customer(&NewCustomer::for_user(user, Some("a@example.ch".into())))
            .await
            .unwrap();
        assert_eq!(created.id, "cus_new");
    }

    #[tokio::test]
    async fn test_network_error() {
        let config = StripeConfig::new("sk_test_123").with_api_base_url("http://127.0.0.1:1");
        let client = StripeClient::new(config).unwrap();

        let err = client.retrieve_price("price_x").await.unwrap_err();
        assert!(matches!(err, ProcessorError::Network(_)));
    }
}
