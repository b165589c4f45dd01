//! PostgreSQL adapters - Database implementations for the store port.
//!
//! - `PostgresSubscriptionStore` - subscriptions and users, compare-and-set writes
//! - `connect` - pool construction from `DatabaseConfig`

mod pool;
mod subscription_store;

pub use pool::connect;
pub use subscription_store::{PostgresSubscriptionStore, SCHEMA};
