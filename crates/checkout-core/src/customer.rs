//! # Customer Identity Resolver
//!
//! Finds or creates the single processor customer for a user.
//!
//! There is no customer-link table: ownership is reconstructed from the
//! customer ids on the user's purchases, which live in two separate tables
//! (product purchases and service purchases). Both are always scanned.

use crate::catalog::ItemKind;
use crate::error::{CheckoutError, CheckoutResult};
use crate::processor::{BoxedPaymentProcessor, NewCustomer};
use crate::store::BoxedStore;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Where the customer id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerSource {
    /// Caller-supplied id, confirmed by purchase history
    Existing,
    ProductPurchases,
    ServicePurchases,
    /// Processor search on `metadata.user_id`
    ProcessorSearch,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCustomer {
    pub customer_id: String,
    pub source: CustomerSource,
}

impl ResolvedCustomer {
    fn new(customer_id: impl Into<String>, source: CustomerSource) -> Self {
        Self {
            customer_id: customer_id.into(),
            source,
        }
    }
}

#[derive(Clone)]
pub struct CustomerIdentityResolver {
    store: BoxedStore,
    processor: BoxedPaymentProcessor,
}

impl CustomerIdentityResolver {
    pub fn new(store: BoxedStore, processor: BoxedPaymentProcessor) -> Self {
        Self { store, processor }
    }

    /// Resolve the customer for `user_id`, creating one only if none can be found.
    ///
    /// `existing_customer_id` is trusted only if it appears on one of the
    /// user's own purchases and is still live upstream.
    #[instrument(skip(self, email, existing_customer_id))]
    pub async fn resolve(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        existing_customer_id: Option<&str>,
    ) -> CheckoutResult<ResolvedCustomer> {
        let product_ids = self
            .store
            .customer_ids_for_user(ItemKind::Product, user_id)
            .await?;
        let service_ids = self
            .store
            .customer_ids_for_user(ItemKind::Service, user_id)
            .await?;

        let existing = existing_customer_id
            .map(str::trim)
            .filter(|id| !id.is_empty());

        if let Some(existing) = existing {
            let owned = product_ids.iter().chain(service_ids.iter()).any(|id| id == existing);
            if !owned {
                warn!(customer_id = existing, "Customer id is not linked to any purchase of this user");
            } else if self.is_live(existing).await? {
                return Ok(ResolvedCustomer::new(existing, CustomerSource::Existing));
            }
        }

        for (ids, source) in [
            (&product_ids, CustomerSource::ProductPurchases),
            (&service_ids, CustomerSource::ServicePurchases),
        ] {
            for id in ids.iter().filter(|id| Some(id.as_str()) != existing) {
                if self.is_live(id).await? {
                    return Ok(ResolvedCustomer::new(id.clone(), source));
                }
            }
        }

        if let Some(found) = self.processor.find_customer_by_user(user_id).await? {
            if found.is_live() {
                info!(customer_id = %found.id, "Reusing customer found by metadata");
                return Ok(ResolvedCustomer::new(found.id, CustomerSource::ProcessorSearch));
            }
        }

        let params = NewCustomer::for_user(user_id, email.map(str::to_string));
        let created = self.create_live(&params).await?;
        info!(customer_id = %created, "Created customer");

        Ok(ResolvedCustomer::new(created, CustomerSource::Created))
    }

    /// Create through the idempotency key. A key can replay a customer that
    /// was deleted after it was first created; that customer is retired and
    /// creation is retried once under a superseding key.
    async fn create_live(&self, params: &NewCustomer) -> CheckoutResult<String> {
        let created = self.processor.create_customer(params).await?;
        if created.is_live() && self.is_live(&created.id).await? {
            return Ok(created.id);
        }

        warn!(customer_id = %created.id, "Idempotent create replayed a deleted customer");
        let retry = self
            .processor
            .create_customer(&params.clone().superseding(&created.id))
            .await?;
        if retry.is_live() && self.is_live(&retry.id).await? {
            return Ok(retry.id);
        }

        Err(CheckoutError::Processor(format!(
            "Customer creation returned deleted customer {}",
            retry.id
        )))
    }

    async fn is_live(&self, customer_id: &str) -> CheckoutResult<bool> {
        match self.processor.retrieve_customer(customer_id).await? {
            Some(customer) if customer.is_live() => Ok(true),
            Some(_) => {
                warn!(customer_id, "Customer is deleted upstream");
                Ok(false)
            }
            None => {
                warn!(customer_id, "Customer not found upstream");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckoutError;
    use crate::testing::{FakeStore, MockProcessor};
    use std::sync::Arc;

    fn setup() -> (Arc<FakeStore>, Arc<MockProcessor>, CustomerIdentityResolver) {
        let store = Arc::new(FakeStore::new());
        let processor = Arc::new(MockProcessor::new());
        let resolver = CustomerIdentityResolver::new(store.clone(), processor.clone());
        (store, processor, resolver)
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let (_, processor, resolver) = setup();
        processor.disable_search();
        let user = Uuid::new_v4();

        let first = resolver.resolve(user, Some("a@example.ch"), None).await.unwrap();
        let second = resolver.resolve(user, Some("a@example.ch"), None).await.unwrap();

        assert_eq!(first.source, CustomerSource::Created);
        assert_eq!(first.customer_id, second.customer_id);
        assert_eq!(processor.created_customer_count(), 1);
        assert_eq!(processor.customer_user(&first.customer_id), Some(user));
    }

    #[tokio::test]
    async fn test_second_call_finds_customer_by_search() {
        let (_, processor, resolver) = setup();
        let user = Uuid::new_v4();

        let first = resolver.resolve(user, None, None).await.unwrap();
        let second = resolver.resolve(user, None, None).await.unwrap();

        assert_eq!(second.source, CustomerSource::ProcessorSearch);
        assert_eq!(first.customer_id, second.customer_id);
    }

    #[tokio::test]
    async fn test_existing_id_requires_ownership() {
        let (store, processor, resolver) = setup();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        processor.insert_customer("cus_other", Some(other));
        store.insert_purchase(ItemKind::Product, other, Some("cus_other"));

        let resolved = resolver.resolve(user, None, Some("cus_other")).await.unwrap();

        assert_ne!(resolved.customer_id, "cus_other");
        assert_eq!(resolved.source, CustomerSource::Created);
    }

    #[tokio::test]
    async fn test_existing_id_owned_through_service_purchase() {
        let (store, processor, resolver) = setup();
        let user = Uuid::new_v4();
        processor.insert_customer("cus_mine", Some(user));
        store.insert_purchase(ItemKind::Service, user, Some("cus_mine"));

        let resolved = resolver.resolve(user, None, Some("cus_mine")).await.unwrap();

        assert_eq!(resolved, ResolvedCustomer::new("cus_mine", CustomerSource::Existing));
        assert_eq!(processor.created_customer_count(), 0);
    }

    #[tokio::test]
    async fn test_scans_service_purchases_when_products_have_none() {
        let (store, processor, resolver) = setup();
        let user = Uuid::new_v4();
        processor.insert_customer("cus_from_service", None);
        store.insert_purchase(ItemKind::Product, user, None);
        store.insert_purchase(ItemKind::Service, user, Some("cus_from_service"));

        let resolved = resolver.resolve(user, None, None).await.unwrap();

        assert_eq!(resolved.customer_id, "cus_from_service");
        assert_eq!(resolved.source, CustomerSource::ServicePurchases);
    }

    #[tokio::test]
    async fn test_skips_deleted_customers() {
        let (store, processor, resolver) = setup();
        let user = Uuid::new_v4();
        processor.insert_customer("cus_deleted", Some(user));
        processor.delete_customer("cus_deleted");
        processor.insert_customer("cus_live", None);
        store.insert_purchase(ItemKind::Product, user, Some("cus_deleted"));
        store.insert_purchase(ItemKind::Service, user, Some("cus_live"));

        let resolved = resolver.resolve(user, None, Some("cus_deleted")).await.unwrap();

        assert_eq!(resolved.customer_id, "cus_live");
    }

    #[tokio::test]
    async fn test_unknown_purchase_customer_is_skipped() {
        let (store, processor, resolver) = setup();
        let user = Uuid::new_v4();
        store.insert_purchase(ItemKind::Product, user, Some("cus_gone"));

        let resolved = resolver.resolve(user, None, None).await.unwrap();

        assert_eq!(resolved.source, CustomerSource::Created);
        assert_eq!(processor.created_customer_count(), 1);
    }

    #[tokio::test]
    async fn test_changed_email_creates_with_new_key() {
        let (_, processor, resolver) = setup();
        processor.disable_search();
        let user = Uuid::new_v4();

        let first = resolver.resolve(user, Some("old@example.ch"), None).await.unwrap();
        let second = resolver.resolve(user, Some("new@example.ch"), None).await.unwrap();

        assert_eq!(second.source, CustomerSource::Created);
        assert_ne!(first.customer_id, second.customer_id);
        assert_eq!(processor.created_customer_count(), 2);
    }

    #[tokio::test]
    async fn test_replayed_deleted_customer_is_not_returned() {
        let (_, processor, resolver) = setup();
        processor.disable_search();
        let user = Uuid::new_v4();

        let first = resolver.resolve(user, Some("a@example.ch"), None).await.unwrap();
        processor.delete_customer(&first.customer_id);

        let second = resolver.resolve(user, Some("a@example.ch"), None).await.unwrap();

        assert_ne!(second.customer_id, first.customer_id);
        assert_eq!(second.source, CustomerSource::Created);
        assert_eq!(processor.created_customer_count(), 2);
        assert_eq!(processor.customer_user(&second.customer_id), Some(user));
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let (store, processor, resolver) = setup();
        store.fail_purchases(true);

        let err = resolver.resolve(Uuid::new_v4(), None, None).await.unwrap_err();

        assert!(matches!(err, CheckoutError::Database(_)));
        assert_eq!(processor.created_customer_count(), 0);
    }
}
