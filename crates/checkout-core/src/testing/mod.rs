//! # Test Doubles
//!
//! In-memory stand-ins for the store and the payment processor, shared by the
//! unit tests here and the integration tests of downstream crates
//! (enable the `test-util` feature).

use crate::catalog::{CatalogItem, ItemKind};
use crate::processor::{
    NewCustomer, PaymentProcessor, PriceRecord, ProcessorCustomer, ProcessorError,
    ProcessorResult,
};
use crate::session::{CheckoutSession, SessionParams};
use crate::store::{
    CatalogStore, CounterKey, ErrorLogEntry, ErrorLogStore, ProfileStore, PurchaseRecord,
    PurchaseStore, RateCounterStore, StoreError, StoreResult, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// FakeStore
// =============================================================================

#[derive(Default)]
struct FakeState {
    items: HashMap<(ItemKind, Uuid), CatalogItem>,
    purchases: HashMap<ItemKind, Vec<PurchaseRecord>>,
    profiles: HashMap<Uuid, UserProfile>,
    counters: HashMap<(CounterKey, DateTime<Utc>), i64>,
    error_logs: Vec<ErrorLogEntry>,
    fail_counters: bool,
    fail_error_log: bool,
    fail_catalog: bool,
    fail_purchases: bool,
}

/// In-memory store with switchable failures
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, item: CatalogItem) {
        lock(&self.state).items.insert((item.kind(), item.id()), item);
    }

    pub fn insert_purchase(&self, kind: ItemKind, user_id: Uuid, customer_id: Option<&str>) {
        lock(&self.state)
            .purchases
            .entry(kind)
            .or_default()
            .push(PurchaseRecord {
                user_id,
                item_id: Uuid::new_v4(),
                stripe_customer_id: customer_id.map(str::to_string),
                created_at: Utc::now(),
            });
    }

    pub fn insert_profile(&self, profile: UserProfile) {
        lock(&self.state).profiles.insert(profile.id, profile);
    }

    pub fn error_logs(&self) -> Vec<ErrorLogEntry> {
        lock(&self.state).error_logs.clone()
    }

    /// Stored count for one window, if the row exists
    pub fn counter_value(&self, key: &CounterKey, window_start: DateTime<Utc>) -> Option<i64> {
        lock(&self.state)
            .counters
            .get(&(key.clone(), window_start))
            .copied()
    }

    pub fn counter_rows(&self) -> usize {
        lock(&self.state).counters.len()
    }

    pub fn fail_counters(&self, fail: bool) {
        lock(&self.state).fail_counters = fail;
    }

    pub fn fail_error_log(&self, fail: bool) {
        lock(&self.state).fail_error_log = fail;
    }

    pub fn fail_catalog(&self, fail: bool) {
        lock(&self.state).fail_catalog = fail;
    }

    pub fn fail_purchases(&self, fail: bool) {
        lock(&self.state).fail_purchases = fail;
    }
}

#[async_trait]
impl CatalogStore for FakeStore {
    async fn find_item(&self, kind: ItemKind, id: Uuid) -> StoreResult<Option<CatalogItem>> {
        let state = lock(&self.state);
        if state.fail_catalog {
            return Err(StoreError::Unavailable("catalog offline".into()));
        }
        Ok(state.items.get(&(kind, id)).cloned())
    }
}

#[async_trait]
impl PurchaseStore for FakeStore {
    async fn customer_ids_for_user(&self, kind: ItemKind, user_id: Uuid) -> StoreResult<Vec<String>> {
        let state = lock(&self.state);
        if state.fail_purchases {
            return Err(StoreError::Query("purchases offline".into()));
        }
        let mut rows: Vec<&PurchaseRecord> = state
            .purchases
            .get(&kind)
            .map(|rows| rows.iter().filter(|r| r.user_id == user_id).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut ids: Vec<String> = Vec::new();
        for id in rows.into_iter().filter_map(|r| r.stripe_customer_id.clone()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ProfileStore for FakeStore {
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        Ok(lock(&self.state).profiles.get(&user_id).cloned())
    }
}

#[async_trait]
impl RateCounterStore for FakeStore {
    async fn counter(&self, key: &CounterKey, window_start: DateTime<Utc>) -> StoreResult<Option<i64>> {
        let state = lock(&self.state);
        if state.fail_counters {
            return Err(StoreError::Unavailable("rate_limits offline".into()));
        }
        Ok(state.counters.get(&(key.clone(), window_start)).copied())
    }

    async fn increment_counter(&self, key: &CounterKey, window_start: DateTime<Utc>) -> StoreResult<i64> {
        let mut state = lock(&self.state);
        if state.fail_counters {
            return Err(StoreError::Unavailable("rate_limits offline".into()));
        }
        let count = state
            .counters
            .entry((key.clone(), window_start))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn delete_counters_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = lock(&self.state);
        if state.fail_counters {
            return Err(StoreError::Unavailable("rate_limits offline".into()));
        }
        let before = state.counters.len();
        state.counters.retain(|(_, start), _| *start >= cutoff);
        Ok((before - state.counters.len()) as u64)
    }
}

#[async_trait]
impl ErrorLogStore for FakeStore {
    async fn insert_error_log(&self, entry: &ErrorLogEntry) -> StoreResult<()> {
        let mut state = lock(&self.state);
        if state.fail_error_log {
            return Err(StoreError::Unavailable("error_logs offline".into()));
        }
        state.error_logs.push(entry.clone());
        Ok(())
    }
}

// =============================================================================
// MockProcessor
// =============================================================================

#[derive(Default)]
struct MockState {
    customers: HashMap<String, ProcessorCustomer>,
    customer_users: HashMap<String, Uuid>,
    idempotency: HashMap<String, (String, Option<String>)>,
    prices: HashMap<String, PriceRecord>,
    sessions: Vec<SessionParams>,
    created_customers: usize,
    price_lookups: usize,
    next_id: u64,
    search_disabled: bool,
    fail_price_lookups: bool,
    session_error: Option<String>,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_mock_{}", prefix, self.next_id)
    }
}

/// Recording payment processor.
///
/// Customer creation honours idempotency keys the way the real API does,
/// including rejecting a key reused with different parameters.
#[derive(Default)]
pub struct MockProcessor {
    state: Mutex<MockState>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing customer, optionally tagged with a user id
    pub fn insert_customer(&self, id: &str, user_id: Option<Uuid>) {
        let mut state = lock(&self.state);
        state
            .customers
            .insert(id.to_string(), ProcessorCustomer::new(id, None));
        if let Some(user_id) = user_id {
            state.customer_users.insert(id.to_string(), user_id);
        }
    }

    pub fn delete_customer(&self, id: &str) {
        if let Some(customer) = lock(&self.state).customers.get_mut(id) {
            customer.deleted = true;
        }
    }

    pub fn insert_price(&self, record: PriceRecord) {
        lock(&self.state).prices.insert(record.id.clone(), record);
    }

    /// Simulate search-index lag: metadata search finds nothing
    pub fn disable_search(&self) {
        lock(&self.state).search_disabled = true;
    }

    pub fn fail_price_lookups(&self, fail: bool) {
        lock(&self.state).fail_price_lookups = fail;
    }

    pub fn fail_sessions(&self, message: &str) {
        lock(&self.state).session_error = Some(message.to_string());
    }

    pub fn created_customer_count(&self) -> usize {
        lock(&self.state).created_customers
    }

    pub fn price_lookup_count(&self) -> usize {
        lock(&self.state).price_lookups
    }

    pub fn customer_user(&self, id: &str) -> Option<Uuid> {
        lock(&self.state).customer_users.get(id).copied()
    }

    pub fn sessions(&self) -> Vec<SessionParams> {
        lock(&self.state).sessions.clone()
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn retrieve_customer(&self, customer_id: &str) -> ProcessorResult<Option<ProcessorCustomer>> {
        Ok(lock(&self.state).customers.get(customer_id).cloned())
    }

    async fn find_customer_by_user(&self, user_id: Uuid) -> ProcessorResult<Option<ProcessorCustomer>> {
        let state = lock(&self.state);
        if state.search_disabled {
            return Ok(None);
        }
        Ok(state
            .customer_users
            .iter()
            .filter(|(_, owner)| **owner == user_id)
            .filter_map(|(id, _)| state.customers.get(id))
            .find(|c| c.is_live())
            .cloned())
    }

    async fn create_customer(&self, customer: &NewCustomer) -> ProcessorResult<ProcessorCustomer> {
        let mut state = lock(&self.state);
        if let Some((existing, email)) = state.idempotency.get(&customer.idempotency_key).cloned() {
            if email != customer.email {
                return Err(ProcessorError::Api {
                    status: 400,
                    message: "Keys for idempotent requests can only be used with the same parameters they were first used with".into(),
                });
            }
            // Replays return the customer as stored, deleted or not
            if let Some(found) = state.customers.get(&existing) {
                return Ok(found.clone());
            }
        }

        let id = state.next_id("cus");
        let created = ProcessorCustomer::new(id.clone(), customer.email.clone());
        state.customers.insert(id.clone(), created.clone());
        state.customer_users.insert(id.clone(), customer.user_id);
        state
            .idempotency
            .insert(customer.idempotency_key.clone(), (id, customer.email.clone()));
        state.created_customers += 1;
        Ok(created)
    }

    async fn retrieve_price(&self, price_id: &str) -> ProcessorResult<Option<PriceRecord>> {
        let mut state = lock(&self.state);
        state.price_lookups += 1;
        if state.fail_price_lookups {
            return Err(ProcessorError::Network("connection reset".into()));
        }
        Ok(state.prices.get(price_id).cloned())
    }

    async fn create_checkout_session(&self, params: &SessionParams) -> ProcessorResult<CheckoutSession> {
        let mut state = lock(&self.state);
        if let Some(message) = state.session_error.clone() {
            return Err(ProcessorError::Api {
                status: 400,
                message,
            });
        }
        state.sessions.push(params.clone());
        let id = state.next_id("cs");
        let url = format!("https://checkout.mock.test/c/pay/{}", id);
        Ok(CheckoutSession::new(id, url))
    }
}
