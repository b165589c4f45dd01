//! HTTP DTOs for the webhook and renewal endpoints.

use serde::Serialize;

use crate::application::handlers::subscription::{HandleWebhookResult, RenewalCheck, RenewalStatus};
use crate::domain::foundation::UserId;

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Minimal acknowledgement returned to the processor.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
}

impl From<&HandleWebhookResult> for WebhookAck {
    fn from(result: &HandleWebhookResult) -> Self {
        Self {
            received: true,
            event_id: result.event_id().to_string(),
        }
    }
}

/// Result of an on-demand renewal check.
#[derive(Debug, Clone, Serialize)]
pub struct RenewalCheckResponse {
    pub user_id: UserId,
    #[serde(flatten)]
    pub check: RenewalCheck,
}

/// Read-only renewal position of a user.
#[derive(Debug, Clone, Serialize)]
pub struct RenewalStatusResponse {
    pub user_id: UserId,
    #[serde(flatten)]
    pub renewal: RenewalStatus,
}

/// Error body: `{ "error": { "code", "message" } }`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
