//! EventRouter - dispatches an authenticated notification to its handler.

use std::sync::Arc;

use tracing::{info, warn};

use super::reconciler::{ReconcileOutcome, SubscriptionReconciler};
use crate::domain::subscription::{BillingEvent, CheckoutSessionPayload, ReconcileError};

/// What routing one event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A reconciler operation ran.
    Reconciled(ReconcileOutcome),

    /// Informational event, logged only.
    Logged,

    /// Type this system does not handle.
    Ignored { event_type: String },
}

pub struct EventRouter {
    reconciler: Arc<SubscriptionReconciler>,
}

impl EventRouter {
    pub fn new(reconciler: Arc<SubscriptionReconciler>) -> Self {
        Self { reconciler }
    }

    /// Runs exactly one handler for the event.
    ///
    /// Errors are returned as-is; deciding which are acknowledged is the
    /// caller's job.
    pub async fn route(&self, event: &BillingEvent) -> Result<RouteOutcome, ReconcileError> {
        let outcome = match event {
            BillingEvent::CheckoutSessionCompleted(session) => {
                log_checkout(session);
                return Ok(RouteOutcome::Logged);
            }
            BillingEvent::SubscriptionCreated(payload) => {
                self.reconciler.on_subscription_created(payload).await?
            }
            BillingEvent::SubscriptionUpdated(payload) => {
                self.reconciler.on_subscription_updated(payload).await?
            }
            BillingEvent::SubscriptionDeleted(payload) => {
                self.reconciler.on_subscription_deleted(payload).await?
            }
            BillingEvent::InvoicePaymentSucceeded(invoice) => {
                self.reconciler.on_invoice_payment_succeeded(invoice).await?
            }
            BillingEvent::InvoicePaymentFailed(invoice) => {
                self.reconciler.on_invoice_payment_failed(invoice).await?
            }
            BillingEvent::Ignored { event_type } => {
                info!(event_type = %event_type, "Ignoring unhandled notification type");
                return Ok(RouteOutcome::Ignored {
                    event_type: event_type.clone(),
                });
            }
        };
        Ok(RouteOutcome::Reconciled(outcome))
    }
}

fn log_checkout(session: &CheckoutSessionPayload) {
    match &session.subscription {
        Some(subscription) => info!(
            session_id = %session.id,
            customer = session.customer.as_deref().unwrap_or("-"),
            subscription = %subscription,
            "Checkout completed, awaiting subscription created event"
        ),
        None => warn!(
            session_id = %session.id,
            mode = session.mode.as_deref().unwrap_or("-"),
            "Checkout completed without a subscription reference"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::FixedClock;
    use crate::adapters::memory::InMemorySubscriptionStore;
    use crate::domain::foundation::{Timestamp, UserId};
    use crate::domain::subscription::{PlanCatalog, User};
    use serde_json::json;

    async fn router() -> (EventRouter, Arc<InMemorySubscriptionStore>) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        store
            .add_user(
                User::new(UserId::new("user-1").unwrap(), "u@example.com", "U")
                    .with_customer_id("cus_1"),
            )
            .await;
        let clock = Arc::new(FixedClock::new(
            Timestamp::parse_rfc3339("2024-01-01T00:00:00Z").unwrap(),
        ));
        let catalog = Arc::new(PlanCatalog::standard("price_month", "price_year").unwrap());
        let reconciler = SubscriptionReconciler::new(store.clone(), catalog, clock);
        (EventRouter::new(Arc::new(reconciler)), store)
    }

    fn created() -> BillingEvent {
        BillingEvent::SubscriptionCreated(
            serde_json::from_value(json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "items": { "data": [{
                    "price": { "id": "price_month" },
                    "current_period_start": 1_704_067_200,
                    "current_period_end": 1_706_745_600
                }]}
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn routes_created_to_reconciler() {
        let (router, store) = router().await;

        let outcome = router.route(&created()).await.unwrap();

        assert!(matches!(
            outcome,
            RouteOutcome::Reconciled(ReconcileOutcome::Created { .. })
        ));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn checkout_is_logged_without_store_access() {
        let (router, store) = router().await;
        store.set_unavailable(true).await;
        let event = BillingEvent::CheckoutSessionCompleted(
            serde_json::from_value(json!({ "id": "cs_1", "customer": "cus_1", "subscription": "sub_1" }))
                .unwrap(),
        );

        let outcome = router.route(&event).await.unwrap();

        assert_eq!(outcome, RouteOutcome::Logged);
    }

    #[tokio::test]
    async fn unknown_type_is_ignored() {
        let (router, _) = router().await;
        let event = BillingEvent::Ignored {
            event_type: "customer.updated".to_string(),
        };

        let outcome = router.route(&event).await.unwrap();

        assert_eq!(
            outcome,
            RouteOutcome::Ignored {
                event_type: "customer.updated".to_string()
            }
        );
    }

    #[tokio::test]
    async fn reconciler_errors_pass_through() {
        let (router, _) = router().await;
        let event = match created() {
            BillingEvent::SubscriptionCreated(p) => BillingEvent::SubscriptionUpdated(p),
            other => other,
        };

        let err = router.route(&event).await.unwrap_err();

        assert!(matches!(err, ReconcileError::UnknownSubscription(_)));
    }
}
