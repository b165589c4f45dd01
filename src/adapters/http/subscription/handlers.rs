//! HTTP handlers for the webhook and renewal endpoints.
//!
//! These handlers connect Axum routes to the application layer handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::application::handlers::subscription::{
    HandleWebhookCommand, HandleWebhookHandler, RenewalSweeper,
};
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::domain::subscription::ReconcileError;
use crate::ports::Clock;

use super::dto::{ErrorResponse, RenewalCheckResponse, RenewalStatusResponse, WebhookAck};

/// Header carrying the processor's signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for the subscription endpoints.
///
/// Cloned for each request; every dependency is Arc-wrapped.
#[derive(Clone)]
pub struct SubscriptionAppState {
    pub webhook_handler: Arc<HandleWebhookHandler>,
    pub sweeper: Arc<RenewalSweeper>,
    pub clock: Arc<dyn Clock>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook Endpoint
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/stripe - Handle processor notifications
///
/// The body is taken as raw bytes; the signature covers them exactly.
pub async fn handle_stripe_webhook(
    State(state): State<SubscriptionAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Notification without {} header", SIGNATURE_HEADER);
            ReconcileError::InvalidSignature
        })?;

    let cmd = HandleWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    let result = state.webhook_handler.handle(cmd).await?;

    Ok(Json(WebhookAck::from(&result)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Renewal Endpoints
// ════════════════════════════════════════════════════════════════════════════════

/// POST /renewals/{user_id}/check - Reconcile one user against the processor
pub async fn check_renewal(
    State(state): State<SubscriptionAppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = UserId::new(user_id).map_err(DomainError::from)?;
    let check = state.sweeper.check_user(&user_id, state.clock.now()).await?;

    Ok(Json(RenewalCheckResponse { user_id, check }))
}

/// GET /renewals/{user_id} - Read-only renewal status
pub async fn get_renewal_status(
    State(state): State<SubscriptionAppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = UserId::new(user_id).map_err(DomainError::from)?;
    let renewal = state
        .sweeper
        .renewal_status(&user_id, state.clock.now())
        .await?;

    Ok(Json(RenewalStatusResponse { user_id, renewal }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts application errors to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        let code = match &err {
            ReconcileError::InvalidSignature => "INVALID_SIGNATURE",
            ReconcileError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            ReconcileError::UnknownCustomer(_) => "UNKNOWN_CUSTOMER",
            ReconcileError::UnknownSubscription(_) => "UNKNOWN_SUBSCRIPTION",
            ReconcileError::MissingSubscriptionReference(_) => "MISSING_SUBSCRIPTION_REFERENCE",
            ReconcileError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            ReconcileError::StaleEvent(_) => "STALE_EVENT",
            ReconcileError::StoreWriteConflict { .. } => "STORE_WRITE_CONFLICT",
            ReconcileError::ProcessorQueryFailed(_) => "PROCESSOR_QUERY_FAILED",
            ReconcileError::InvalidRequest(_) => "VALIDATION_FAILED",
            ReconcileError::Store(_) => "INTERNAL_ERROR",
        };
        // Soft outcomes are acknowledged by the webhook handler and only
        // reach here from the renewal endpoints.
        let status = if err.is_soft() {
            StatusCode::CONFLICT
        } else {
            err.status_code()
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let (status, code) = match err.code {
            ErrorCode::ValidationFailed => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            ErrorCode::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            ErrorCode::SubscriptionNotFound => (StatusCode::NOT_FOUND, "SUBSCRIPTION_NOT_FOUND"),
            ErrorCode::NoActiveSubscription => (StatusCode::NOT_FOUND, "NO_ACTIVE_SUBSCRIPTION"),
            ErrorCode::InvalidStateTransition => (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION"),
            ErrorCode::DuplicateActiveSubscription => {
                (StatusCode::CONFLICT, "DUPLICATE_ACTIVE_SUBSCRIPTION")
            }
            ErrorCode::ConcurrentModification => (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION"),
            ErrorCode::PaymentProcessorError => (StatusCode::BAD_GATEWAY, "PAYMENT_PROCESSOR_ERROR"),
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        Self {
            status,
            code,
            message: err.message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "Request failed");
        }
        let body = ErrorResponse::new(self.code, self.message);
        (self.status, Json(body)).into_response()
    }
}
