//! HTTP adapter for the subscription endpoints.
//!
//! - `POST /webhooks/stripe` - Handle processor notifications
//! - `GET /renewals/{user_id}` - Read-only renewal status
//! - `POST /renewals/{user_id}/check` - Reconcile one user against the processor

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{ApiError, SubscriptionAppState, SIGNATURE_HEADER};
pub use routes::{renewal_routes, subscription_router, webhook_routes};
