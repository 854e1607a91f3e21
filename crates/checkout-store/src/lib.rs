//! # checkout-store
//!
//! Storage backends for the checkout core:
//!
//! - **MemoryStore**: in-process maps seeded from `config/catalog.toml`, for
//!   local development and tests
//! - **PgStore**: Postgres via `sqlx`, with the schema in `migrations/`

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;
