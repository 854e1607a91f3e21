//! # Catalog Types
//!
//! Catalog items (products and services) and their price-identifier fields.
//! Items are read-only here; they come from the database or from
//! `config/catalog.toml` in development.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[serde(alias = "chf")]
    CHF,
    #[serde(alias = "eur")]
    EUR,
    #[serde(alias = "usd")]
    USD,
    #[serde(alias = "gbp")]
    GBP,
}

impl Currency {
    pub const ALL: [Currency; 4] = [Currency::CHF, Currency::EUR, Currency::USD, Currency::GBP];

    /// Lowercase ISO code, as the processor reports it
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::CHF => "chf",
            Currency::EUR => "eur",
            Currency::USD => "usd",
            Currency::GBP => "gbp",
        }
    }

    /// Uppercase ISO code, as callers send it
    pub fn code(&self) -> &'static str {
        match self {
            Currency::CHF => "CHF",
            Currency::EUR => "EUR",
            Currency::USD => "USD",
            Currency::GBP => "GBP",
        }
    }

    /// Compare against a processor-reported currency string
    pub fn matches(&self, other: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(other.trim())
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::CHF
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.matches(s))
            .ok_or_else(|| format!("Unsupported currency: {}", s.trim()))
    }
}

/// Billing interval for subscription prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceInterval {
    Monthly,
    Yearly,
}

impl PriceInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceInterval::Monthly => "monthly",
            PriceInterval::Yearly => "yearly",
        }
    }

    /// The processor's recurring interval name
    pub fn processor_interval(&self) -> &'static str {
        match self {
            PriceInterval::Monthly => "month",
            PriceInterval::Yearly => "year",
        }
    }

    /// Parse a processor recurring interval ("month" / "year")
    pub fn from_processor(interval: &str) -> Option<Self> {
        match interval {
            "month" => Some(PriceInterval::Monthly),
            "year" => Some(PriceInterval::Yearly),
            _ => None,
        }
    }
}

impl std::fmt::Display for PriceInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(PriceInterval::Monthly),
            "yearly" => Ok(PriceInterval::Yearly),
            other => Err(format!(
                "Invalid interval '{}': must be 'monthly' or 'yearly'",
                other
            )),
        }
    }
}

/// How an item is charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingType {
    OneTime,
    Subscription,
    Freemium,
}

impl Default for PricingType {
    fn default() -> Self {
        PricingType::OneTime
    }
}

impl PricingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingType::OneTime => "one_time",
            PricingType::Subscription => "subscription",
            PricingType::Freemium => "freemium",
        }
    }
}

impl FromStr for PricingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_time" => Ok(PricingType::OneTime),
            "subscription" => Ok(PricingType::Subscription),
            "freemium" => Ok(PricingType::Freemium),
            other => Err(format!("Unknown pricing type: {}", other)),
        }
    }
}

/// Accepted payment methods for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Stripe,
    BankTransfer,
    Both,
}

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Stripe
    }
}

impl PaymentMethod {
    /// Whether the online checkout path may be used
    pub fn accepts_card(&self) -> bool {
        matches!(self, PaymentMethod::Stripe | PaymentMethod::Both)
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(PaymentMethod::Stripe),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "both" => Ok(PaymentMethod::Both),
            other => Err(format!("Unknown payment method: {}", other)),
        }
    }
}

/// Which catalog table an item (or purchase) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Product,
    Service,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Product => "product",
            ItemKind::Service => "service",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Treat blank and "0" price fields as not configured
pub fn configured(field: Option<&String>) -> Option<&str> {
    field
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && *s != "0")
}

/// A product with flat, named price fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,

    pub name: String,

    #[serde(default)]
    pub pricing_type: PricingType,

    /// Currency of the legacy price
    #[serde(default)]
    pub base_currency: Currency,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Legacy single price
    #[serde(default)]
    pub stripe_price_id: Option<String>,

    #[serde(default)]
    pub stripe_price_id_monthly: Option<String>,

    #[serde(default)]
    pub stripe_price_id_yearly: Option<String>,

    #[serde(default)]
    pub stripe_price_id_chf: Option<String>,

    #[serde(default)]
    pub stripe_price_id_eur: Option<String>,

    #[serde(default)]
    pub stripe_price_id_usd: Option<String>,

    #[serde(default)]
    pub stripe_price_id_gbp: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Product {
    /// Create a product with no prices configured
    pub fn new(id: Uuid, name: impl Into<String>, pricing_type: PricingType) -> Self {
        Self {
            id,
            name: name.into(),
            pricing_type,
            base_currency: Currency::CHF,
            active: true,
            stripe_price_id: None,
            stripe_price_id_monthly: None,
            stripe_price_id_yearly: None,
            stripe_price_id_chf: None,
            stripe_price_id_eur: None,
            stripe_price_id_usd: None,
            stripe_price_id_gbp: None,
        }
    }

    /// Builder: set the legacy price
    pub fn with_legacy_price(mut self, price_id: impl Into<String>) -> Self {
        self.stripe_price_id = Some(price_id.into());
        self
    }

    /// Builder: set an interval-specific price
    pub fn with_interval_price(mut self, interval: PriceInterval, price_id: impl Into<String>) -> Self {
        match interval {
            PriceInterval::Monthly => self.stripe_price_id_monthly = Some(price_id.into()),
            PriceInterval::Yearly => self.stripe_price_id_yearly = Some(price_id.into()),
        }
        self
    }

    /// Builder: set a currency-specific price
    pub fn with_currency_price(mut self, currency: Currency, price_id: impl Into<String>) -> Self {
        let price_id = Some(price_id.into());
        match currency {
            Currency::CHF => self.stripe_price_id_chf = price_id,
            Currency::EUR => self.stripe_price_id_eur = price_id,
            Currency::USD => self.stripe_price_id_usd = price_id,
            Currency::GBP => self.stripe_price_id_gbp = price_id,
        }
        self
    }

    fn currency_field(&self, currency: Currency) -> Option<&String> {
        match currency {
            Currency::CHF => self.stripe_price_id_chf.as_ref(),
            Currency::EUR => self.stripe_price_id_eur.as_ref(),
            Currency::USD => self.stripe_price_id_usd.as_ref(),
            Currency::GBP => self.stripe_price_id_gbp.as_ref(),
        }
    }
}

/// A service with a nested `{currency: {interval-or-"regular": price_id}}` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,

    pub name: String,

    #[serde(default)]
    pub pricing_type: PricingType,

    #[serde(default)]
    pub payment_method: PaymentMethod,

    #[serde(default)]
    pub base_currency: Currency,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub stripe_price_id: Option<String>,

    #[serde(default)]
    pub stripe_price_id_monthly: Option<String>,

    #[serde(default)]
    pub stripe_price_id_yearly: Option<String>,

    #[serde(default)]
    pub stripe_prices: HashMap<String, HashMap<String, String>>,
}

/// Key for non-recurring entries in a service price table
pub const REGULAR_PRICE_KEY: &str = "regular";

impl Service {
    pub fn new(id: Uuid, name: impl Into<String>, pricing_type: PricingType) -> Self {
        Self {
            id,
            name: name.into(),
            pricing_type,
            payment_method: PaymentMethod::Stripe,
            base_currency: Currency::CHF,
            active: true,
            stripe_price_id: None,
            stripe_price_id_monthly: None,
            stripe_price_id_yearly: None,
            stripe_prices: HashMap::new(),
        }
    }

    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    pub fn with_legacy_price(mut self, price_id: impl Into<String>) -> Self {
        self.stripe_price_id = Some(price_id.into());
        self
    }

    /// Builder: add an entry to the nested price table.
    /// `slot` is `"monthly"`, `"yearly"` or `"regular"`.
    pub fn with_table_price(
        mut self,
        currency: Currency,
        slot: impl Into<String>,
        price_id: impl Into<String>,
    ) -> Self {
        self.stripe_prices
            .entry(currency.as_str().to_string())
            .or_default()
            .insert(slot.into(), price_id.into());
        self
    }

    fn price_table(&self, currency: Currency) -> Option<&HashMap<String, String>> {
        self.stripe_prices
            .iter()
            .find(|(key, _)| currency.matches(key))
            .map(|(_, table)| table)
    }
}

/// A purchasable catalog item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "lowercase")]
pub enum CatalogItem {
    Product(Product),
    Service(Service),
}

impl CatalogItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            CatalogItem::Product(_) => ItemKind::Product,
            CatalogItem::Service(_) => ItemKind::Service,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            CatalogItem::Product(p) => p.id,
            CatalogItem::Service(s) => s.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CatalogItem::Product(p) => &p.name,
            CatalogItem::Service(s) => &s.name,
        }
    }

    pub fn pricing_type(&self) -> PricingType {
        match self {
            CatalogItem::Product(p) => p.pricing_type,
            CatalogItem::Service(s) => s.pricing_type,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            CatalogItem::Product(p) => p.active,
            CatalogItem::Service(s) => s.active,
        }
    }

    pub fn base_currency(&self) -> Currency {
        match self {
            CatalogItem::Product(p) => p.base_currency,
            CatalogItem::Service(s) => s.base_currency,
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.pricing_type() == PricingType::Subscription
    }

    /// Interval-specific price field
    pub fn interval_price(&self, interval: PriceInterval) -> Option<&str> {
        let field = match (self, interval) {
            (CatalogItem::Product(p), PriceInterval::Monthly) => p.stripe_price_id_monthly.as_ref(),
            (CatalogItem::Product(p), PriceInterval::Yearly) => p.stripe_price_id_yearly.as_ref(),
            (CatalogItem::Service(s), PriceInterval::Monthly) => s.stripe_price_id_monthly.as_ref(),
            (CatalogItem::Service(s), PriceInterval::Yearly) => s.stripe_price_id_yearly.as_ref(),
        };
        configured(field)
    }

    /// Currency-specific price.
    ///
    /// Products have one field per currency. Services look up the interval slot
    /// of their nested table first, then the `"regular"` slot.
    pub fn currency_price(&self, currency: Currency, interval: Option<PriceInterval>) -> Option<&str> {
        match self {
            CatalogItem::Product(p) => configured(p.currency_field(currency)),
            CatalogItem::Service(s) => {
                let table = s.price_table(currency)?;
                interval
                    .and_then(|i| configured(table.get(i.as_str())))
                    .or_else(|| configured(table.get(REGULAR_PRICE_KEY)))
            }
        }
    }

    /// Legacy single default price
    pub fn legacy_price(&self) -> Option<&str> {
        match self {
            CatalogItem::Product(p) => configured(p.stripe_price_id.as_ref()),
            CatalogItem::Service(s) => configured(s.stripe_price_id.as_ref()),
        }
    }
}

/// Catalog seed file (`config/catalog.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn len(&self) -> usize {
        self.products.len() + self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.services.is_empty()
    }
}
