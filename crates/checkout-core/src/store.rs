//! # Storage Traits
//!
//! Records and traits for the relational store behind the checkout core:
//! catalog lookup, purchase history, user profiles, rate-window counters and
//! the append-only error log.
//!
//! Implementations live in `checkout-store` (`MemoryStore`, `PgStore`).

use crate::catalog::{CatalogItem, Currency, ItemKind};
use crate::error::ErrorType;
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Query failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Row could not be decoded into a domain type
    #[error("Corrupt row in {table}: {message}")]
    Decode { table: &'static str, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Records
// =============================================================================

/// Who a rate-window counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierType {
    User,
    Ip,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::User => "user",
            IdentifierType::Ip => "ip",
        }
    }
}

/// Fixed-window granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Minute, Granularity::Hour];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
        }
    }

    pub fn length(&self) -> Duration {
        match self {
            Granularity::Minute => Duration::minutes(1),
            Granularity::Hour => Duration::hours(1),
        }
    }

    /// Aligned start of the window containing `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.duration_trunc(self.length()).unwrap_or(now)
    }

    /// Whole seconds until the window containing `now` ends, at least 1
    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> u64 {
        let end = self.window_start(now) + self.length();
        let millis = (end - now).num_milliseconds().max(0);
        let secs = (millis + 999) / 1000;
        secs.max(1) as u64
    }
}

/// Key of a counter row, minus the window start
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub identifier: String,
    pub identifier_type: IdentifierType,
    pub scope: String,
    pub granularity: Granularity,
}

/// Profile data the checkout needs about a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_currency: Option<String>,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
}

impl UserProfile {
    /// Preferred currency, if set and recognised
    pub fn currency(&self) -> Option<Currency> {
        self.preferred_currency
            .as_deref()
            .and_then(|c| c.parse().ok())
    }
}

/// A purchase row, reduced to what identity resolution reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub user_id: Uuid,
    pub item_id: Uuid,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only failure record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub function_name: String,
    pub error_type: ErrorType,
    pub message: String,
    pub details: serde_json::Value,
    pub user_id: Option<Uuid>,
    pub request_snapshot: serde_json::Value,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Traits
// =============================================================================

/// Read-only catalog lookup
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_item(&self, kind: ItemKind, id: Uuid) -> StoreResult<Option<CatalogItem>>;
}

/// Purchase history, one table per item kind
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Distinct non-null customer ids on `user_id`'s purchases of `kind`, newest first
    async fn customer_ids_for_user(&self, kind: ItemKind, user_id: Uuid) -> StoreResult<Vec<String>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>>;
}

/// Fixed-window counters.
///
/// Read and increment are separate calls; there is no transaction around them.
#[async_trait]
pub trait RateCounterStore: Send + Sync {
    /// Current count for the window starting at `window_start`, if a row exists
    async fn counter(&self, key: &CounterKey, window_start: DateTime<Utc>) -> StoreResult<Option<i64>>;

    /// Increment the row for this window, creating it with count 1 if absent
    async fn increment_counter(&self, key: &CounterKey, window_start: DateTime<Utc>) -> StoreResult<i64>;

    /// Delete rows whose window started before `cutoff`; returns rows removed
    async fn delete_counters_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait ErrorLogStore: Send + Sync {
    async fn insert_error_log(&self, entry: &ErrorLogEntry) -> StoreResult<()>;
}

/// Everything the checkout flow reads or writes
pub trait CommerceStore:
    CatalogStore + PurchaseStore + ProfileStore + RateCounterStore + ErrorLogStore
{
}

impl<T> CommerceStore for T where
    T: CatalogStore + PurchaseStore + ProfileStore + RateCounterStore + ErrorLogStore
{
}

/// Shared, dynamically dispatched store
pub type BoxedStore = Arc<dyn CommerceStore>;
