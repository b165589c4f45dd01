//! Subscription handlers.
//!
//! ## Reconciliation
//! - `SubscriptionReconciler` - one operation per event category
//! - `EventRouter` - dispatches typed events to the reconciler
//! - `HandleWebhookHandler` - authenticate, decode, route
//! - `RenewalSweeper` - batch and per-user reconciliation against the processor
//!
//! ## Queries and commands for the rest of the system
//! - Get a user's active subscription
//! - Check whether a user's subscription is active
//! - Cancel a user's subscription

mod cancel_subscription;
mod check_subscription;
mod get_active_subscription;
mod handle_webhook;
mod reconciler;
mod renewal_sweeper;
mod router;

// Reconciliation
pub use handle_webhook::{HandleWebhookCommand, HandleWebhookHandler, HandleWebhookResult};
pub use reconciler::{ReconcileOutcome, SubscriptionReconciler, DEFAULT_MAX_WRITE_ATTEMPTS};
pub use renewal_sweeper::{
    Discrepancy, RenewalCheck, RenewalStatus, RenewalSweeper, SweepMode, SweepSummary,
    UpcomingRenewal, DEFAULT_SWEEP_CONCURRENCY,
};
pub use router::{EventRouter, RouteOutcome};

// Commands
pub use cancel_subscription::{CancelSubscriptionCommand, CancelSubscriptionHandler};

// Queries
pub use check_subscription::{
    CheckSubscriptionHandler, CheckSubscriptionQuery, CheckSubscriptionResult,
};
pub use get_active_subscription::{GetActiveSubscriptionHandler, GetActiveSubscriptionQuery};
