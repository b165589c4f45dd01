//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `clock` - System and fixed clocks
//! - `memory` - In-memory store for tests and local runs
//! - `postgres` - PostgreSQL store
//! - `stripe` - Stripe REST client and a scripted processor mock
//! - `http` - Axum endpoints for notifications and renewals

pub mod clock;
pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;

pub use clock::{FixedClock, SystemClock};
pub use memory::InMemorySubscriptionStore;
pub use postgres::PostgresSubscriptionStore;
pub use stripe::{MockPaymentProcessor, StripeClient, StripeConfig};
