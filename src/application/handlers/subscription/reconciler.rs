//! SubscriptionReconciler - applies one processor event to the local store.
//!
//! Every mutation runs as a read-transform-commit loop against
//! `SubscriptionStore::compare_and_update`. Two paths also touch the user's
//! other records: create goes through `insert_replacing_active`, and a
//! record moving into `active` commits through
//! `compare_and_update_replacing_active`. Both cancel the user's other
//! active-like subscriptions in the same unit.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::domain::foundation::{SubscriptionId, Timestamp};
use crate::domain::subscription::{
    BillingPeriod, Change, InvoicePayload, PlanCatalog, PlanKey, ReconcileError, Subscription,
    SubscriptionPayload, SubscriptionSnapshot, SubscriptionStatus, TransformError,
};
use crate::ports::{Clock, InsertOutcome, SubscriptionStore};

/// Default bound on compare-and-set attempts per event.
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 5;

/// What a reconciliation call did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new record was inserted; `replaced` were canceled in the same unit.
    Created {
        subscription: Subscription,
        replaced: Vec<SubscriptionId>,
    },

    /// An existing record was rewritten.
    Updated(Subscription),

    /// The record already reflected the event; nothing was written.
    Unchanged(Subscription),
}

impl ReconcileOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            ReconcileOutcome::Created { subscription, .. } => subscription,
            ReconcileOutcome::Updated(subscription) => subscription,
            ReconcileOutcome::Unchanged(subscription) => subscription,
        }
    }
}

pub struct SubscriptionReconciler {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
    clock: Arc<dyn Clock>,
    max_write_attempts: u32,
}

impl SubscriptionReconciler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<PlanCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    /// `customer.subscription.created`
    ///
    /// # Errors
    ///
    /// - `UnknownCustomer` (soft) if no user holds the customer reference
    /// - `MalformedPayload` if the period cannot be normalized
    pub async fn on_subscription_created(
        &self,
        payload: &SubscriptionPayload,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let snapshot = payload.to_snapshot()?;

        let user = self
            .store
            .find_user_by_customer_id(&snapshot.customer_id)
            .await?
            .ok_or_else(|| ReconcileError::UnknownCustomer(snapshot.customer_id.clone()))?;

        let now = self.clock.now();
        let plan_key = self.resolve_plan(&snapshot);
        let period = snapshot.period.unwrap_or_else(|| {
            warn!(
                external_id = %snapshot.external_id,
                "Subscription carries no billing period, using current time"
            );
            BillingPeriod::instant(now)
        });

        let subscription = Subscription::from_snapshot(user.id, &snapshot, plan_key, period, now);

        match self.store.insert_replacing_active(&subscription, now).await? {
            InsertOutcome::Inserted { replaced } => {
                for prior in &replaced {
                    info!(
                        user_id = %prior.user_id,
                        replaced_external_id = %prior.external_subscription_id,
                        new_external_id = %subscription.external_subscription_id,
                        "Canceled previous subscription on plan switch"
                    );
                }
                info!(
                    user_id = %subscription.user_id,
                    external_id = %subscription.external_subscription_id,
                    status = %subscription.status,
                    plan = subscription.plan_key.as_ref().map(PlanKey::as_str).unwrap_or("-"),
                    "Subscription created"
                );
                Ok(ReconcileOutcome::Created {
                    replaced: replaced.iter().map(|s| s.id).collect(),
                    subscription,
                })
            }
            InsertOutcome::AlreadyExists(_) => {
                debug!(
                    external_id = %snapshot.external_id,
                    "Subscription already recorded, applying created event as update"
                );
                self.apply_snapshot(&snapshot).await
            }
        }
    }

    /// `customer.subscription.updated`
    ///
    /// # Errors
    ///
    /// - `UnknownSubscription` (soft) if the record was never created
    /// - `StaleEvent` (soft) if the payload's period is older than the stored one
    /// - `InvalidTransition` (soft) if the status change is not allowed
    pub async fn on_subscription_updated(
        &self,
        payload: &SubscriptionPayload,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let snapshot = payload.to_snapshot()?;
        self.apply_snapshot(&snapshot).await
    }

    /// `customer.subscription.deleted`
    pub async fn on_subscription_deleted(
        &self,
        payload: &SubscriptionPayload,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let snapshot = payload.to_snapshot()?;
        let canceled_at = snapshot.canceled_at;
        self.write(&snapshot.external_id, |sub, now| {
            sub.cancel(canceled_at.unwrap_or(now))
        })
        .await
    }

    /// `invoice.payment_succeeded`
    pub async fn on_invoice_payment_succeeded(
        &self,
        invoice: &InvoicePayload,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let external_id = invoice_subscription(invoice)?;
        self.write(external_id, |sub, now| sub.mark_active(now)).await
    }

    /// `invoice.payment_failed`
    pub async fn on_invoice_payment_failed(
        &self,
        invoice: &InvoicePayload,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let external_id = invoice_subscription(invoice)?;
        self.write(external_id, |sub, now| sub.mark_past_due(now)).await
    }

    /// Overwrites status, period, and plan from an authoritative snapshot.
    ///
    /// Shared by the update event and the renewal sweep.
    pub async fn apply_snapshot(
        &self,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let plan_key = match snapshot.price_id {
            Some(_) => self.resolve_plan(snapshot),
            None => None,
        };
        self.write(&snapshot.external_id, |sub, now| {
            sub.apply_snapshot(snapshot, plan_key.clone(), now)
        })
        .await
    }

    /// Expires a record whose period elapsed at `now` without renewal.
    ///
    /// A concurrent renewal that moved the period end past `now` wins; the
    /// call then fails with `StaleEvent`.
    pub async fn expire(
        &self,
        external_id: &str,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.write(external_id, |sub, _| sub.expire(now)).await
    }

    /// Price → plan lookup. Fails closed: an unmapped price yields `None`.
    fn resolve_plan(&self, snapshot: &SubscriptionSnapshot) -> Option<PlanKey> {
        let Some(price_id) = snapshot.price_id.as_deref() else {
            warn!(external_id = %snapshot.external_id, "PlanMappingMissing: subscription has no price");
            return None;
        };
        match self.catalog.resolve_price(price_id) {
            Some(plan) => Some(plan.key.clone()),
            None => {
                warn!(
                    external_id = %snapshot.external_id,
                    price_id,
                    "PlanMappingMissing: price matches no active plan, keeping raw price"
                );
                None
            }
        }
    }

    /// Commits a record that becomes `active`, canceling whatever else the
    /// user holds in the same unit.
    async fn commit_reactivation(
        &self,
        next: &Subscription,
        expected_version: i64,
    ) -> Result<bool, ReconcileError> {
        let Some(replaced) = self
            .store
            .compare_and_update_replacing_active(next, expected_version, next.updated_at)
            .await?
        else {
            return Ok(false);
        };
        for prior in &replaced {
            info!(
                user_id = %prior.user_id,
                replaced_external_id = %prior.external_subscription_id,
                new_external_id = %next.external_subscription_id,
                "Canceled other subscription on reactivation"
            );
        }
        Ok(true)
    }

    async fn write<F>(
        &self,
        external_id: &str,
        mut transform: F,
    ) -> Result<ReconcileOutcome, ReconcileError>
    where
        F: FnMut(&mut Subscription, Timestamp) -> Result<Change, TransformError> + Send,
    {
        for attempt in 1..=self.max_write_attempts {
            let current = self
                .store
                .find_by_external_id(external_id)
                .await?
                .ok_or_else(|| ReconcileError::UnknownSubscription(external_id.to_string()))?;

            let mut next = current.clone();
            let change = transform(&mut next, self.clock.now())
                .map_err(|e| ReconcileError::from_transform(external_id, e))?;

            if change == Change::Noop {
                debug!(external_id, "Event already reflected, nothing to write");
                return Ok(ReconcileOutcome::Unchanged(current));
            }

            let committed = if next.status == SubscriptionStatus::Active
                && current.status != SubscriptionStatus::Active
            {
                self.commit_reactivation(&next, current.version).await?
            } else {
                self.store.compare_and_update(&next, current.version).await?
            };

            if committed {
                next.version = current.version + 1;
                info!(
                    external_id,
                    user_id = %next.user_id,
                    status = %next.status,
                    period_end = %next.current_period_end,
                    attempt,
                    "Subscription reconciled"
                );
                return Ok(ReconcileOutcome::Updated(next));
            }

            debug!(external_id, attempt, "Concurrent write detected, retrying");
        }

        error!(
            external_id,
            attempts = self.max_write_attempts,
            "Giving up after repeated write conflicts"
        );
        Err(ReconcileError::StoreWriteConflict {
            external_id: external_id.to_string(),
            attempts: self.max_write_attempts,
        })
    }
}

fn invoice_subscription(invoice: &InvoicePayload) -> Result<&str, ReconcileError> {
    invoice
        .subscription_id()
        .ok_or_else(|| ReconcileError::MissingSubscriptionReference(invoice.id.clone()))
}
