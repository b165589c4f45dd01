//! Subscription domain module.
//!
//! Local subscription records, the processor's view of them, and the rules
//! for reconciling one with the other.
//!
//! # Module Structure
//!
//! - `aggregate` - Subscription entity and its pure transforms
//! - `status` - SubscriptionStatus state machine and processor vocabulary
//! - `plan` - Static plan catalog
//! - `notification` - Notification envelope and typed payloads
//! - `authenticator` - Signature verification for inbound notifications
//! - `errors` - ReconcileError taxonomy

mod aggregate;
mod authenticator;
mod errors;
mod notification;
mod plan;
mod status;
mod user;

pub use aggregate::{BillingPeriod, Change, Subscription, SubscriptionSnapshot, TransformError};
pub use authenticator::{signature_header, EventAuthenticator, SignatureHeader, DEFAULT_TOLERANCE_SECS};
pub use errors::ReconcileError;
pub use notification::{
    BillingEvent, CheckoutSessionPayload, InvoicePayload, Notification, NotificationType,
    SubscriptionPayload,
};
pub use plan::{BillingInterval, Plan, PlanCatalog, PlanKey};
pub use status::{ProcessorStatus, SubscriptionStatus};
pub use user::User;
