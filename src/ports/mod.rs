//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `Clock` - Current time
//! - `SubscriptionStore` - Subscription and user persistence
//! - `PaymentProcessor` - Authoritative subscription state at the processor

mod clock;
mod payment_processor;
mod subscription_store;

pub use clock::Clock;
pub use payment_processor::{PaymentProcessor, ProcessorError, ProcessorErrorCode};
pub use subscription_store::{InsertOutcome, SubscriptionStore};
