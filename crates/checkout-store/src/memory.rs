//! # In-Memory Store
//!
//! Process-local implementation of the store traits, seeded from a catalog
//! file. Used for local development when no `DATABASE_URL` is configured,
//! and by the HTTP integration tests.

use async_trait::async_trait;
use checkout_core::{
    Catalog, CatalogItem, CatalogStore, CounterKey, ErrorLogEntry, ErrorLogStore, ItemKind,
    ProfileStore, PurchaseRecord, PurchaseStore, RateCounterStore, StoreError, StoreResult,
    UserProfile,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    items: HashMap<(ItemKind, Uuid), CatalogItem>,
    product_purchases: Vec<PurchaseRecord>,
    service_purchases: Vec<PurchaseRecord>,
    profiles: HashMap<Uuid, UserProfile>,
    rate_limits: HashMap<(CounterKey, DateTime<Utc>), i64>,
    error_logs: Vec<ErrorLogEntry>,
}

impl Tables {
    fn purchases(&self, kind: ItemKind) -> &Vec<PurchaseRecord> {
        match kind {
            ItemKind::Product => &self.product_purchases,
            ItemKind::Service => &self.service_purchases,
        }
    }

    fn purchases_mut(&mut self, kind: ItemKind) -> &mut Vec<PurchaseRecord> {
        match kind {
            ItemKind::Product => &mut self.product_purchases,
            ItemKind::Service => &mut self.service_purchases,
        }
    }
}

/// Store backed by in-process maps
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding every item of `catalog`
    pub fn from_catalog(catalog: Catalog) -> Self {
        let mut tables = Tables::default();
        for product in catalog.products {
            tables
                .items
                .insert((ItemKind::Product, product.id), CatalogItem::Product(product));
        }
        for service in catalog.services {
            tables
                .items
                .insert((ItemKind::Service, service.id), CatalogItem::Service(service));
        }

        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Load a TOML catalog file
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Unavailable(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let catalog = Catalog::from_toml(&content).map_err(|e| StoreError::Decode {
            table: "catalog",
            message: format!("{}: {}", path.display(), e),
        })?;

        info!("Loaded {} catalog items from {}", catalog.len(), path.display());
        Ok(Self::from_catalog(catalog))
    }

    pub async fn insert_item(&self, item: CatalogItem) {
        self.tables
            .write()
            .await
            .items
            .insert((item.kind(), item.id()), item);
    }

    pub async fn record_purchase(&self, kind: ItemKind, purchase: PurchaseRecord) {
        self.tables.write().await.purchases_mut(kind).push(purchase);
    }

    pub async fn upsert_profile(&self, profile: UserProfile) {
        self.tables.write().await.profiles.insert(profile.id, profile);
    }

    pub async fn error_logs(&self) -> Vec<ErrorLogEntry> {
        self.tables.read().await.error_logs.clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_item(&self, kind: ItemKind, id: Uuid) -> StoreResult<Option<CatalogItem>> {
        Ok(self.tables.read().await.items.get(&(kind, id)).cloned())
    }
}

#[async_trait]
impl PurchaseStore for MemoryStore {
    async fn customer_ids_for_user(&self, kind: ItemKind, user_id: Uuid) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&PurchaseRecord> = tables
            .purchases(kind)
            .iter()
            .filter(|p| p.user_id == user_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut ids: Vec<String> = Vec::new();
        for id in rows.into_iter().filter_map(|p| p.stripe_customer_id.as_ref()) {
            if !id.is_empty() && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        Ok(self.tables.read().await.profiles.get(&user_id).cloned())
    }
}

#[async_trait]
impl RateCounterStore for MemoryStore {
    async fn counter(&self, key: &CounterKey, window_start: DateTime<Utc>) -> StoreResult<Option<i64>> {
        Ok(self
            .tables
            .read()
            .await
            .rate_limits
            .get(&(key.clone(), window_start))
            .copied())
    }

    async fn increment_counter(&self, key: &CounterKey, window_start: DateTime<Utc>) -> StoreResult<i64> {
        let mut tables = self.tables.write().await;
        let count = tables
            .rate_limits
            .entry((key.clone(), window_start))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn delete_counters_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.rate_limits.len();
        tables.rate_limits.retain(|(_, start), _| *start >= cutoff);
        Ok((before - tables.rate_limits.len()) as u64)
    }
}

#[async_trait]
impl ErrorLogStore for MemoryStore {
    async fn insert_error_log(&self, entry: &ErrorLogEntry) -> StoreResult<()> {
        self.tables.write().await.error_logs.push(entry.clone());
        Ok(())
    }
}
