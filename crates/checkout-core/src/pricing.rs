//! # Price Resolver
//!
//! Picks the processor price identifier for a catalog item, a currency and an
//! optional billing interval.
//!
//! Resolution order, first match wins:
//!
//! 1. Interval-specific field (subscriptions with an interval only)
//! 2. Currency-specific field (flat field for products, nested table for
//!    services); skipped when its recurring interval contradicts the request
//! 3. Legacy single price, whatever its currency
//! 4. The whole chain again with the default currency
//!
//! Blank and `"0"` fields count as not configured.

use crate::catalog::{CatalogItem, Currency, PriceInterval};
use crate::error::{CheckoutError, CheckoutResult};
use crate::processor::{BoxedPaymentProcessor, PriceRecord};
use serde::Serialize;
use tracing::{debug, instrument, warn};

/// Which catalog field produced the price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Interval,
    Currency,
    Legacy,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Interval => "interval",
            PriceSource::Currency => "currency",
            PriceSource::Legacy => "legacy",
        }
    }
}

/// A payable price for one checkout
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrice {
    pub price_id: String,
    pub currency: Currency,
    /// True only if the processor's live record confirmed the currency
    pub verified: bool,
    pub source: PriceSource,
    /// Live record, when one was fetched
    pub record: Option<PriceRecord>,
}

impl ResolvedPrice {
    fn new(price_id: &str, currency: Currency, source: PriceSource) -> Self {
        Self {
            price_id: price_id.to_string(),
            currency,
            verified: false,
            source,
            record: None,
        }
    }

    /// Whether the live record says the price recurs; `None` when unknown
    pub fn is_recurring(&self) -> Option<bool> {
        self.record.as_ref().map(PriceRecord::is_recurring)
    }
}

/// Resolves catalog prices, optionally verifying them upstream
#[derive(Clone)]
pub struct PriceResolver {
    processor: BoxedPaymentProcessor,
    default_currency: Currency,
    verify: bool,
}

impl PriceResolver {
    pub fn new(processor: BoxedPaymentProcessor, default_currency: Currency, verify: bool) -> Self {
        Self {
            processor,
            default_currency,
            verify,
        }
    }

    /// Resolve a price or fail with `PriceNotConfigured`
    #[instrument(skip(self, item), fields(item_id = %item.id(), currency = %currency))]
    pub async fn resolve(
        &self,
        item: &CatalogItem,
        currency: Currency,
        interval: Option<PriceInterval>,
    ) -> CheckoutResult<ResolvedPrice> {
        if let Some(price) = self.resolve_for(item, currency, interval).await {
            return Ok(price);
        }

        if currency != self.default_currency {
            debug!(
                fallback = %self.default_currency,
                "No price in requested currency, retrying with default"
            );
            if let Some(price) = self.resolve_for(item, self.default_currency, interval).await {
                return Ok(price);
            }
        }

        Err(CheckoutError::PriceNotConfigured {
            item_id: item.id().to_string(),
            currency: currency.code().to_string(),
        })
    }

    async fn resolve_for(
        &self,
        item: &CatalogItem,
        currency: Currency,
        interval: Option<PriceInterval>,
    ) -> Option<ResolvedPrice> {
        let subscription_interval = interval.filter(|_| item.is_subscription());

        if let Some(interval) = subscription_interval {
            if let Some(price_id) = item.interval_price(interval) {
                let mut price = ResolvedPrice::new(price_id, currency, PriceSource::Interval);
                self.verify_currency(&mut price).await;
                if let Some(record) = &price.record {
                    if record.interval() != Some(interval) {
                        warn!(
                            price_id,
                            expected = interval.processor_interval(),
                            actual = ?record.recurring_interval,
                            "Interval price recurs on a different interval"
                        );
                    }
                }
                return Some(price);
            }
        }

        if let Some(price_id) = item.currency_price(currency, interval) {
            let mut price = ResolvedPrice::new(price_id, currency, PriceSource::Currency);

            if let Some(interval) = subscription_interval {
                if let Some(record) = self.fetch(price_id).await {
                    if record.interval() != Some(interval) {
                        warn!(
                            price_id,
                            expected = interval.processor_interval(),
                            actual = ?record.recurring_interval,
                            "Currency price does not match requested interval, falling through"
                        );
                    } else {
                        price.verified = self.verify && currency.matches(&record.currency);
                        price.record = Some(record);
                        return Some(price);
                    }
                } else {
                    return Some(price);
                }
            } else {
                self.verify_currency(&mut price).await;
                return Some(price);
            }
        }

        if let Some(price_id) = item.legacy_price() {
            let mut price = ResolvedPrice::new(price_id, item.base_currency(), PriceSource::Legacy);
            if self.verify {
                if let Some(record) = self.fetch(price_id).await {
                    if let Ok(actual) = record.currency.parse::<Currency>() {
                        price.currency = actual;
                    }
                    price.verified = currency.matches(&record.currency);
                    price.record = Some(record);
                }
            }
            if price.currency != currency {
                warn!(
                    price_id,
                    requested = %currency,
                    actual = %price.currency,
                    "Using legacy price in a different currency"
                );
            }
            return Some(price);
        }

        None
    }

    /// Fetch the live record and mark the price verified if its currency matches
    async fn verify_currency(&self, price: &mut ResolvedPrice) {
        if !self.verify {
            return;
        }
        let Some(record) = self.fetch(&price.price_id).await else {
            return;
        };

        if price.currency.matches(&record.currency) {
            price.verified = true;
        } else {
            warn!(
                price_id = %price.price_id,
                expected = %price.currency,
                actual = %record.currency,
                "Price currency does not match catalog"
            );
        }
        price.record = Some(record);
    }

    /// Live record, or `None` if the processor does not know it or the call failed
    async fn fetch(&self, price_id: &str) -> Option<PriceRecord> {
        match self.processor.retrieve_price(price_id).await {
            Ok(Some(record)) => {
                if !record.active {
                    warn!(price_id, "Price is archived upstream");
                }
                Some(record)
            }
            Ok(None) => {
                warn!(price_id, "Price not found upstream");
                None
            }
            Err(e) => {
                warn!(price_id, "Price lookup failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PricingType, Product, Service};
    use crate::testing::MockProcessor;
    use std::sync::Arc;
    use uuid::Uuid;

    fn resolver(processor: &Arc<MockProcessor>, verify: bool) -> PriceResolver {
        PriceResolver::new(processor.clone(), Currency::CHF, verify)
    }

    fn subscription_product() -> Product {
        Product::new(Uuid::new_v4(), "Pro", PricingType::Subscription)
    }

    #[tokio::test]
    async fn test_interval_field_wins_over_currency_field() {
        let processor = Arc::new(MockProcessor::new());
        processor.insert_price(PriceRecord::recurring("price_month", "chf", PriceInterval::Monthly));
        processor.insert_price(PriceRecord::recurring("price_chf", "chf", PriceInterval::Monthly));

        let item = CatalogItem::Product(
            subscription_product()
                .with_interval_price(PriceInterval::Monthly, "price_month")
                .with_currency_price(Currency::CHF, "price_chf"),
        );

        let price = resolver(&processor, true)
            .resolve(&item, Currency::CHF, Some(PriceInterval::Monthly))
            .await
            .unwrap();

        assert_eq!(price.price_id, "price_month");
        assert_eq!(price.source, PriceSource::Interval);
        assert!(price.verified);
    }

    #[tokio::test]
    async fn test_interval_price_in_wrong_currency_is_kept_unverified() {
        let processor = Arc::new(MockProcessor::new());
        processor.insert_price(PriceRecord::recurring("price_month", "chf", PriceInterval::Monthly));

        let item = CatalogItem::Product(
            subscription_product().with_interval_price(PriceInterval::Monthly, "price_month"),
        );

        let price = resolver(&processor, true)
            .resolve(&item, Currency::EUR, Some(PriceInterval::Monthly))
            .await
            .unwrap();

        assert_eq!(price.price_id, "price_month");
        assert!(!price.verified);
    }

    #[tokio::test]
    async fn test_legacy_only_returns_unverified_for_other_currency() {
        let processor = Arc::new(MockProcessor::new());
        processor.insert_price(PriceRecord::one_time("price_legacy", "chf"));

        let item = CatalogItem::Product(
            Product::new(Uuid::new_v4(), "Guide", PricingType::OneTime).with_legacy_price("price_legacy"),
        );
        let resolver = resolver(&processor, true);

        for currency in [Currency::EUR, Currency::USD, Currency::GBP] {
            let price = resolver.resolve(&item, currency, None).await.unwrap();
            assert_eq!(price.price_id, "price_legacy");
            assert_eq!(price.source, PriceSource::Legacy);
            assert_eq!(price.currency, Currency::CHF);
            assert!(!price.verified);
        }

        let price = resolver.resolve(&item, Currency::CHF, None).await.unwrap();
        assert!(price.verified);
    }

    #[tokio::test]
    async fn test_currency_price_with_wrong_interval_falls_through() {
        let processor = Arc::new(MockProcessor::new());
        processor.insert_price(PriceRecord::recurring("price_eur_year", "eur", PriceInterval::Yearly));
        processor.insert_price(PriceRecord::recurring("price_legacy", "chf", PriceInterval::Monthly));

        let item = CatalogItem::Product(
            subscription_product()
                .with_currency_price(Currency::EUR, "price_eur_year")
                .with_legacy_price("price_legacy"),
        );

        let price = resolver(&processor, true)
            .resolve(&item, Currency::EUR, Some(PriceInterval::Monthly))
            .await
            .unwrap();

        assert_eq!(price.price_id, "price_legacy");
        assert_eq!(price.source, PriceSource::Legacy);
    }

    #[tokio::test]
    async fn test_service_table_resolves_interval_slot() {
        let processor = Arc::new(MockProcessor::new());
        processor.insert_price(PriceRecord::recurring("price_usd_month", "usd", PriceInterval::Monthly));

        let item = CatalogItem::Service(
            Service::new(Uuid::new_v4(), "Mentoring", PricingType::Subscription)
                .with_table_price(Currency::USD, "monthly", "price_usd_month")
                .with_table_price(Currency::USD, "regular", "price_usd_once"),
        );

        let price = resolver(&processor, true)
            .resolve(&item, Currency::USD, Some(PriceInterval::Monthly))
            .await
            .unwrap();

        assert_eq!(price.price_id, "price_usd_month");
        assert_eq!(price.source, PriceSource::Currency);
        assert!(price.verified);
        assert_eq!(price.is_recurring(), Some(true));
    }

    #[tokio::test]
    async fn test_retries_with_default_currency() {
        let processor = Arc::new(MockProcessor::new());
        let item = CatalogItem::Service(
            Service::new(Uuid::new_v4(), "Audit", PricingType::OneTime)
                .with_table_price(Currency::CHF, "regular", "price_chf_once"),
        );

        let price = resolver(&processor, false)
            .resolve(&item, Currency::GBP, None)
            .await
            .unwrap();

        assert_eq!(price.price_id, "price_chf_once");
        assert_eq!(price.currency, Currency::CHF);
        assert!(!price.verified);
        assert_eq!(processor.price_lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_nothing_configured() {
        let processor = Arc::new(MockProcessor::new());
        let item = CatalogItem::Product(
            Product::new(Uuid::new_v4(), "Draft", PricingType::OneTime)
                .with_legacy_price("0")
                .with_currency_price(Currency::EUR, ""),
        );

        let err = resolver(&processor, true)
            .resolve(&item, Currency::EUR, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::PriceNotConfigured { .. }));
    }

    #[tokio::test]
    async fn test_lookup_failure_leaves_price_unverified() {
        let processor = Arc::new(MockProcessor::new());
        processor.fail_price_lookups(true);

        let item = CatalogItem::Product(
            Product::new(Uuid::new_v4(), "Guide", PricingType::OneTime)
                .with_currency_price(Currency::EUR, "price_eur"),
        );

        let price = resolver(&processor, true)
            .resolve(&item, Currency::EUR, None)
            .await
            .unwrap();

        assert_eq!(price.price_id, "price_eur");
        assert!(!price.verified);
        assert!(price.record.is_none());
    }
}
