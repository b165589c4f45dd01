//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Webhook reconciliation and the renewal sweep write; the query handlers
//! only read.

pub mod handlers;

pub use handlers::subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CheckSubscriptionHandler,
    CheckSubscriptionQuery, CheckSubscriptionResult, EventRouter, GetActiveSubscriptionHandler,
    GetActiveSubscriptionQuery, HandleWebhookCommand, HandleWebhookHandler, HandleWebhookResult,
    ReconcileOutcome, RenewalCheck, RenewalStatus, RenewalSweeper, RouteOutcome,
    SubscriptionReconciler, SweepMode, SweepSummary,
};
