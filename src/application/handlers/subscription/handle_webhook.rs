//! HandleWebhookHandler - Command handler for inbound processor notifications.
//!
//! Pipeline: authenticate, decode, route. Authentication and decoding run
//! before any store access; a failure there returns immediately.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::router::{EventRouter, RouteOutcome};
use crate::domain::subscription::{EventAuthenticator, ReconcileError};

/// Command to handle one notification delivery.
#[derive(Debug, Clone)]
pub struct HandleWebhookCommand {
    /// Raw request body, exactly as received.
    pub payload: Vec<u8>,
    /// Signature header value.
    pub signature: String,
}

/// Result of a delivery that should be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleWebhookResult {
    /// The event was applied (or already reflected).
    Processed { event_id: String, outcome: RouteOutcome },

    /// A soft failure: logged, nothing written, acknowledged anyway.
    Acknowledged { event_id: String, reason: String },
}

impl HandleWebhookResult {
    pub fn event_id(&self) -> &str {
        match self {
            HandleWebhookResult::Processed { event_id, .. } => event_id,
            HandleWebhookResult::Acknowledged { event_id, .. } => event_id,
        }
    }
}

pub struct HandleWebhookHandler {
    authenticator: Arc<EventAuthenticator>,
    router: Arc<EventRouter>,
}

impl HandleWebhookHandler {
    pub fn new(authenticator: Arc<EventAuthenticator>, router: Arc<EventRouter>) -> Self {
        Self {
            authenticator,
            router,
        }
    }

    /// # Errors
    ///
    /// Only boundary rejections and internal faults. Soft outcomes come
    /// back as `Ok(Acknowledged)`.
    pub async fn handle(
        &self,
        cmd: HandleWebhookCommand,
    ) -> Result<HandleWebhookResult, ReconcileError> {
        let notification = self
            .authenticator
            .authenticate(&cmd.payload, &cmd.signature)
            .map_err(|e| {
                warn!(error = %e, "Rejected notification");
                e
            })?;

        let event_id = notification.id.clone();
        let event_type = notification.event_type.clone();
        let event = notification.into_event().map_err(|e| {
            warn!(event_id = %event_id, event_type = %event_type, error = %e, "Undecodable notification");
            e
        })?;

        match self.router.route(&event).await {
            Ok(outcome) => {
                info!(event_id = %event_id, event_type = %event_type, "Notification processed");
                Ok(HandleWebhookResult::Processed { event_id, outcome })
            }
            Err(e) if e.is_soft() => {
                warn!(
                    event_id = %event_id,
                    event_type = %event_type,
                    reason = %e,
                    "Notification acknowledged without changes"
                );
                Ok(HandleWebhookResult::Acknowledged {
                    event_id,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                error!(
                    event_id = %event_id,
                    event_type = %event_type,
                    error = %e,
                    "Notification processing failed, processor will redeliver"
                );
                Err(e)
            }
        }
    }
}
