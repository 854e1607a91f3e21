//! # Postgres Store
//!
//! `sqlx` implementation of the store traits. The schema lives in
//! `migrations/` and is applied with [`PgStore::migrate`].

use async_trait::async_trait;
use checkout_core::{
    CatalogItem, CatalogStore, CounterKey, Currency, ErrorLogEntry, ErrorLogStore, ItemKind,
    PaymentMethod, PricingType, Product, ProfileStore, PurchaseStore, RateCounterStore, Service,
    StoreError, StoreResult, UserProfile,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Store backed by a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url`
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(db_error)?;

        info!("Connected to Postgres");
        Ok(Self { pool })
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("migration failed: {}", e)))?;
        Ok(())
    }
}

fn db_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn parse<T: FromStr<Err = String>>(table: &'static str, value: &str) -> StoreResult<T> {
    value
        .parse()
        .map_err(|message| StoreError::Decode { table, message })
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    pricing_type: String,
    base_currency: String,
    active: bool,
    stripe_price_id: Option<String>,
    stripe_price_id_monthly: Option<String>,
    stripe_price_id_yearly: Option<String>,
    stripe_price_id_chf: Option<String>,
    stripe_price_id_eur: Option<String>,
    stripe_price_id_usd: Option<String>,
    stripe_price_id_gbp: Option<String>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> StoreResult<Self> {
        Ok(Product {
            id: row.id,
            name: row.name,
            pricing_type: parse::<PricingType>("products", &row.pricing_type)?,
            base_currency: parse::<Currency>("products", &row.base_currency)?,
            active: row.active,
            stripe_price_id: row.stripe_price_id,
            stripe_price_id_monthly: row.stripe_price_id_monthly,
            stripe_price_id_yearly: row.stripe_price_id_yearly,
            stripe_price_id_chf: row.stripe_price_id_chf,
            stripe_price_id_eur: row.stripe_price_id_eur,
            stripe_price_id_usd: row.stripe_price_id_usd,
            stripe_price_id_gbp: row.stripe_price_id_gbp,
        })
    }
}

#[derive(Debug, FromRow)]
struct ServiceRow {
    id: Uuid,
    name: String,
    pricing_type: String,
    payment_method: String,
    base_currency: String,
    active: bool,
    stripe_price_id: Option<String>,
    stripe_price_id_monthly: Option<String>,
    stripe_price_id_yearly: Option<String>,
    stripe_prices: Json<serde_json::Value>,
}

impl TryFrom<ServiceRow> for Service {
    type Error = StoreError;

    fn try_from(row: ServiceRow) -> StoreResult<Self> {
        Ok(Service {
            id: row.id,
            name: row.name,
            pricing_type: parse::<PricingType>("services", &row.pricing_type)?,
            payment_method: parse::<PaymentMethod>("services", &row.payment_method)?,
            base_currency: parse::<Currency>("services", &row.base_currency)?,
            active: row.active,
            stripe_price_id: row.stripe_price_id,
            stripe_price_id_monthly: row.stripe_price_id_monthly,
            stripe_price_id_yearly: row.stripe_price_id_yearly,
            stripe_prices: price_table(&row.stripe_prices.0),
        })
    }
}

/// Nested `{currency: {slot: price_id}}` table; non-string leaves are dropped
fn price_table(value: &serde_json::Value) -> HashMap<String, HashMap<String, String>> {
    let Some(currencies) = value.as_object() else {
        return HashMap::new();
    };

    currencies
        .iter()
        .filter_map(|(currency, slots)| {
            let slots = slots
                .as_object()?
                .iter()
                .filter_map(|(slot, id)| Some((slot.clone(), id.as_str()?.to_string())))
                .collect::<HashMap<_, _>>();
            Some((currency.to_lowercase(), slots))
        })
        .collect()
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: Uuid,
    email: Option<String>,
    preferred_currency: Option<String>,
    stripe_customer_id: Option<String>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            id: row.id,
            email: row.email,
            preferred_currency: row.preferred_currency,
            stripe_customer_id: row.stripe_customer_id,
        }
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl CatalogStore for PgStore {
    async fn find_item(&self, kind: ItemKind, id: Uuid) -> StoreResult<Option<CatalogItem>> {
        match kind {
            ItemKind::Product => {
                let row: Option<ProductRow> = sqlx::query_as(
                    r#"
                    SELECT id, name, pricing_type, base_currency, active,
                           stripe_price_id, stripe_price_id_monthly, stripe_price_id_yearly,
                           stripe_price_id_chf, stripe_price_id_eur,
                           stripe_price_id_usd, stripe_price_id_gbp
                    FROM products
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

                row.map(|r| Product::try_from(r).map(CatalogItem::Product))
                    .transpose()
            }
            ItemKind::Service => {
                let row: Option<ServiceRow> = sqlx::query_as(
                    r#"
                    SELECT id, name, pricing_type, payment_method, base_currency, active,
                           stripe_price_id, stripe_price_id_monthly, stripe_price_id_yearly,
                           stripe_prices
                    FROM services
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

                row.map(|r| Service::try_from(r).map(CatalogItem::Service))
                    .transpose()
            }
        }
    }
}

#[async_trait]
impl PurchaseStore for PgStore {
    async fn customer_ids_for_user(&self, kind: ItemKind, user_id: Uuid) -> StoreResult<Vec<String>> {
        let sql = match kind {
            ItemKind::Product => {
                r#"
                SELECT stripe_customer_id
                FROM product_purchases
                WHERE user_id = $1
                  AND stripe_customer_id IS NOT NULL
                  AND stripe_customer_id <> ''
                GROUP BY stripe_customer_id
                ORDER BY MAX(created_at) DESC
                "#
            }
            ItemKind::Service => {
                r#"
                SELECT stripe_customer_id
                FROM service_purchases
                WHERE user_id = $1
                  AND stripe_customer_id IS NOT NULL
                  AND stripe_customer_id <> ''
                GROUP BY stripe_customer_id
                ORDER BY MAX(created_at) DESC
                "#
            }
        };

        sqlx::query_scalar(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            r#"
            SELECT id, email, preferred_currency, stripe_customer_id
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl RateCounterStore for PgStore {
    async fn counter(&self, key: &CounterKey, window_start: DateTime<Utc>) -> StoreResult<Option<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT request_count
            FROM rate_limits
            WHERE identifier = $1
              AND identifier_type = $2
              AND scope = $3
              AND granularity = $4
              AND window_start = $5
            "#,
        )
        .bind(&key.identifier)
        .bind(key.identifier_type.as_str())
        .bind(&key.scope)
        .bind(key.granularity.as_str())
        .bind(window_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn increment_counter(&self, key: &CounterKey, window_start: DateTime<Utc>) -> StoreResult<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO rate_limits
                (identifier, identifier_type, scope, granularity, window_start, request_count)
            VALUES ($1, $2, $3, $4, $5, 1)
            ON CONFLICT (identifier, identifier_type, scope, granularity, window_start)
            DO UPDATE SET request_count = rate_limits.request_count + 1
            RETURNING request_count
            "#,
        )
        .bind(&key.identifier)
        .bind(key.identifier_type.as_str())
        .bind(&key.scope)
        .bind(key.granularity.as_str())
        .bind(window_start)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn delete_counters_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        debug!(rows = result.rows_affected(), "rate_limits cleanup");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ErrorLogStore for PgStore {
    async fn insert_error_log(&self, entry: &ErrorLogEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO error_logs
                (function_name, error_type, message, details, user_id,
                 request_snapshot, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&entry.function_name)
        .bind(entry.error_type.as_str())
        .bind(&entry.message)
        .bind(Json(&entry.details))
        .bind(entry.user_id)
        .bind(Json(&entry.request_snapshot))
        .bind(entry.ip_address.as_deref())
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_core::{Granularity, IdentifierType};
    use serde_json::json;

    #[test]
    fn test_price_table_conversion() {
        let value = json!({
            "CHF": {"monthly": "price_chf_month", "regular": "price_chf"},
            "eur": {"regular": 42},
            "usd": "not-a-table"
        });

        let table = price_table(&value);
        assert_eq!(table["chf"]["monthly"], "price_chf_month");
        assert!(table["eur"].is_empty());
        assert!(!table.contains_key("usd"));
        assert!(price_table(&serde_json::Value::Null).is_empty());
    }

    #[test]
    fn test_product_row_decoding() {
        let row = ProductRow {
            id: Uuid::new_v4(),
            name: "Pro".into(),
            pricing_type: "weekly".into(),
            base_currency: "CHF".into(),
            active: true,
            stripe_price_id: None,
            stripe_price_id_monthly: None,
            stripe_price_id_yearly: None,
            stripe_price_id_chf: None,
            stripe_price_id_eur: None,
            stripe_price_id_usd: None,
            stripe_price_id_gbp: None,
        };

        assert!(matches!(
            Product::try_from(row),
            Err(StoreError::Decode { table: "products", .. })
        ));
    }

    /// Runs only when `TEST_DATABASE_URL` points at a scratch database
    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let store = PgStore::connect(&url).await.ok()?;
        store.migrate().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    async fn test_counter_upsert() {
        let Some(store) = test_store().await else {
            return;
        };
        let key = CounterKey {
            identifier: Uuid::new_v4().to_string(),
            identifier_type: IdentifierType::User,
            scope: "create-checkout".into(),
            granularity: Granularity::Minute,
        };
        let window = Granularity::Minute.window_start(Utc::now());

        assert_eq!(store.counter(&key, window).await.unwrap(), None);
        assert_eq!(store.increment_counter(&key, window).await.unwrap(), 1);
        assert_eq!(store.increment_counter(&key, window).await.unwrap(), 2);
        assert_eq!(store.counter(&key, window).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let Some(store) = test_store().await else {
            return;
        };

        assert!(store
            .find_item(ItemKind::Service, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
        assert!(store.find_profile(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store
            .customer_ids_for_user(ItemKind::Product, Uuid::new_v4())
            .await
            .unwrap()
            .is_empty());
    }
}
