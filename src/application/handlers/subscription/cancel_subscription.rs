//! CancelSubscriptionHandler - Command handler for canceling a user's subscription.
//!
//! The processor is canceled first. Its answer is then reconciled into the
//! local record through the same path an update notification takes, so the
//! `customer.subscription.deleted` notification that follows is a no-op.

use std::sync::Arc;

use tracing::info;

use super::reconciler::SubscriptionReconciler;
use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::domain::subscription::Subscription;
use crate::ports::{PaymentProcessor, SubscriptionStore};

#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user_id: UserId,
}

pub struct CancelSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    processor: Arc<dyn PaymentProcessor>,
    reconciler: Arc<SubscriptionReconciler>,
}

impl CancelSubscriptionHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        processor: Arc<dyn PaymentProcessor>,
        reconciler: Arc<SubscriptionReconciler>,
    ) -> Self {
        Self {
            store,
            processor,
            reconciler,
        }
    }

    /// # Errors
    ///
    /// - `NoActiveSubscription` if the user holds no active-like record
    /// - `PaymentProcessorError` if the processor refused the cancellation;
    ///   the local record is unchanged
    pub async fn handle(&self, cmd: CancelSubscriptionCommand) -> Result<Subscription, DomainError> {
        let target = self
            .store
            .list_for_user(&cmd.user_id)
            .await?
            .into_iter()
            .find(|s| s.status.is_active_like())
            .ok_or_else(|| {
                DomainError::new(ErrorCode::NoActiveSubscription, "No active subscription")
                    .with_detail("user_id", cmd.user_id.to_string())
            })?;

        let canceled = self
            .processor
            .cancel_subscription(&target.external_subscription_id)
            .await?;

        let snapshot = canceled.to_snapshot()?;
        let outcome = self.reconciler.apply_snapshot(&snapshot).await?;

        info!(
            user_id = %cmd.user_id,
            external_id = %target.external_subscription_id,
            "Subscription canceled on request"
        );
        Ok(outcome.subscription().clone())
    }
}
