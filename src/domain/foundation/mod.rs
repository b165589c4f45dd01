//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, and error types that the
//! subscription domain is built from.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{SubscriptionId, UserId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
