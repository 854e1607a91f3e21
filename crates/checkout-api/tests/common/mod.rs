//! Shared test harness: the real router over an in-memory store and a
//! recording payment processor.

#![allow(dead_code)]

use axum::http::{header, HeaderName, HeaderValue};
use axum_test::{TestRequest, TestServer};
use checkout_api::{create_router, AppConfig, AppState, JwtAuth, LogFormat};
use checkout_core::testing::MockProcessor;
use checkout_core::{
    BoxedPaymentProcessor, BoxedStore, CatalogItem, CheckoutConfig, Currency, PaymentMethod,
    PriceInterval, PriceRecord, PricingType, Product, Service,
};
use checkout_store::MemoryStore;
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret";
pub const CHECKOUT_PATH: &str = "/functions/v1/create-checkout";

pub struct TestHarness {
    pub server: TestServer,
    pub store: Arc<MemoryStore>,
    pub processor: Arc<MockProcessor>,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub one_time_id: Uuid,
    pub bank_transfer_id: Uuid,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(CheckoutConfig::default().with_site_url("https://shop.example")).await
    }

    pub async fn with_config(checkout_config: CheckoutConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(MockProcessor::new());

        let subscription_id = Uuid::new_v4();
        store
            .insert_item(CatalogItem::Product(
                Product::new(subscription_id, "Pro Plan", PricingType::Subscription)
                    .with_interval_price(PriceInterval::Monthly, "price_pro_monthly")
                    .with_interval_price(PriceInterval::Yearly, "price_pro_yearly"),
            ))
            .await;
        processor.insert_price(PriceRecord::recurring("price_pro_monthly", "chf", PriceInterval::Monthly));
        processor.insert_price(PriceRecord::recurring("price_pro_yearly", "chf", PriceInterval::Yearly));

        let one_time_id = Uuid::new_v4();
        store
            .insert_item(CatalogItem::Service(
                Service::new(one_time_id, "Consultation", PricingType::OneTime)
                    .with_table_price(Currency::EUR, "regular", "price_consult_eur")
                    .with_legacy_price("price_consult_chf"),
            ))
            .await;
        processor.insert_price(PriceRecord::one_time("price_consult_eur", "eur"));
        processor.insert_price(PriceRecord::one_time("price_consult_chf", "chf"));

        let bank_transfer_id = Uuid::new_v4();
        store
            .insert_item(CatalogItem::Service(
                Service::new(bank_transfer_id, "On-site Workshop", PricingType::OneTime)
                    .with_payment_method(PaymentMethod::BankTransfer)
                    .with_legacy_price("price_workshop"),
            ))
            .await;

        let config = AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            database_url: None,
            catalog_path: None,
            allowed_origins: Vec::new(),
            jwt_secret: JWT_SECRET.to_string(),
            trust_proxy_headers: true,
            log_format: LogFormat::Pretty,
        };

        let state = AppState::with_parts(
            config,
            checkout_config,
            store.clone() as BoxedStore,
            processor.clone() as BoxedPaymentProcessor,
        );
        let server = TestServer::new(create_router(state)).expect("Failed to create test server");

        Self {
            server,
            store,
            processor,
            user_id: Uuid::new_v4(),
            subscription_id,
            one_time_id,
            bank_transfer_id,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        JwtAuth::new(JWT_SECRET)
            .issue(user_id, Some("buyer@example.com".to_string()), Duration::minutes(15))
            .expect("Failed to sign token")
    }

    /// Authenticated checkout request for the harness user
    pub fn checkout(&self) -> TestRequest {
        let token = self.token_for(self.user_id);
        self.server
            .post(CHECKOUT_PATH)
            .add_header(header::AUTHORIZATION, bearer(&token))
            .add_header(HeaderName::from_static("x-forwarded-for"), HeaderValue::from_static("203.0.113.10"))
    }
}

pub fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).expect("Invalid header value")
}
