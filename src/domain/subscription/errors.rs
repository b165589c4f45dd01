//! Error taxonomy for notification handling and reconciliation.
//!
//! Every variant falls in one of three buckets, which decide the HTTP
//! answer the processor sees:
//!
//! - boundary rejection (400): the notification is forged or unreadable
//! - soft (200): logged and acknowledged, redelivery would not help
//! - internal fault (500): the processor should retry

use http::StatusCode;
use thiserror::Error;

use super::{SubscriptionStatus, TransformError};
use crate::domain::foundation::{DomainError, ErrorCode};

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Signature header missing, malformed, mismatched, or outside the skew window.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Body is not a valid notification envelope or payload.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// No local user holds the processor's customer reference.
    #[error("Unknown customer: {0}")]
    UnknownCustomer(String),

    /// No local record for the processor's subscription reference.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// An invoice event that is not tied to a subscription.
    #[error("Invoice {0} carries no subscription reference")]
    MissingSubscriptionReference(String),

    /// The event asks for a transition the lifecycle forbids.
    #[error("Invalid transition for {external_id}: {from} -> {to}")]
    InvalidTransition {
        external_id: String,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    /// An older snapshot arrived after a newer one was applied.
    #[error("Stale event for {0}")]
    StaleEvent(String),

    /// Compare-and-set kept losing to concurrent writers.
    #[error("Write conflict on {external_id} after {attempts} attempts")]
    StoreWriteConflict { external_id: String, attempts: u32 },

    /// The payment processor could not be queried.
    #[error("Processor query failed: {0}")]
    ProcessorQueryFailed(String),

    /// A caller-supplied argument is out of range.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Store failure or any other unanticipated fault.
    #[error("Store error: {0}")]
    Store(String),
}

impl ReconcileError {
    /// Builds the reconciliation error for a refused transform.
    pub fn from_transform(external_id: &str, err: TransformError) -> Self {
        match err {
            TransformError::InvalidTransition { from, to } => ReconcileError::InvalidTransition {
                external_id: external_id.to_string(),
                from,
                to,
            },
            TransformError::StalePeriod { .. } | TransformError::NotYetElapsed { .. } => {
                ReconcileError::StaleEvent(external_id.to_string())
            }
        }
    }

    /// True for outcomes that are logged and acknowledged as success.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ReconcileError::UnknownCustomer(_)
                | ReconcileError::UnknownSubscription(_)
                | ReconcileError::MissingSubscriptionReference(_)
                | ReconcileError::InvalidTransition { .. }
                | ReconcileError::StaleEvent(_)
        )
    }

    /// True if the processor should redeliver the notification.
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Status codes steer the processor's retry behavior:
    /// 2xx acknowledges, 4xx drops, 5xx retries.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReconcileError::InvalidSignature
            | ReconcileError::MalformedPayload(_)
            | ReconcileError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            err if err.is_soft() => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DomainError> for ReconcileError {
    fn from(err: DomainError) -> Self {
        ReconcileError::Store(err.to_string())
    }
}

/// Query-surface callers see `DomainError`, not the webhook taxonomy.
impl From<ReconcileError> for DomainError {
    fn from(err: ReconcileError) -> Self {
        let code = match &err {
            ReconcileError::UnknownSubscription(_) => ErrorCode::SubscriptionNotFound,
            ReconcileError::UnknownCustomer(_) => ErrorCode::UserNotFound,
            ReconcileError::InvalidTransition { .. } | ReconcileError::StaleEvent(_) => {
                ErrorCode::InvalidStateTransition
            }
            ReconcileError::StoreWriteConflict { .. } => ErrorCode::ConcurrentModification,
            ReconcileError::ProcessorQueryFailed(_) => ErrorCode::PaymentProcessorError,
            ReconcileError::Store(_) => ErrorCode::DatabaseError,
            ReconcileError::InvalidRequest(_) => ErrorCode::ValidationFailed,
            _ => ErrorCode::InternalError,
        };
        DomainError::new(code, err.to_string())
    }
}
