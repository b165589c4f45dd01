//! Subscription entity and the pure transforms applied to it.
//!
//! Transforms never touch storage or the clock. Callers pass `now`, run the
//! transform on a freshly read record, and persist the result through a
//! compare-and-set write. A transform reports [`Change::Noop`] when the
//! record already reflects the requested state, which is what makes
//! redelivered events harmless.

use crate::domain::foundation::{StateMachine, SubscriptionId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{PlanKey, ProcessorStatus, SubscriptionStatus};

/// Billing window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl BillingPeriod {
    /// Returns `None` when `end` precedes `start`.
    pub fn new(start: Timestamp, end: Timestamp) -> Option<Self> {
        if end.is_before(&start) {
            None
        } else {
            Some(Self { start, end })
        }
    }

    /// A zero-length window at `at`.
    pub fn instant(at: Timestamp) -> Self {
        Self { start: at, end: at }
    }
}

/// Processor-side view of one subscription, normalized from either a webhook
/// payload or a direct processor query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub external_id: String,
    pub customer_id: String,
    pub status: ProcessorStatus,
    pub price_id: Option<String>,
    pub period: Option<BillingPeriod>,
    pub canceled_at: Option<Timestamp>,
}

/// Outcome of a transform that succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Change {
    Applied,
    Noop,
}

/// Why a transform refused to modify the record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("cannot transition from {from} to {to}")]
    InvalidTransition {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    #[error("incoming period end {incoming} precedes stored period end {stored}")]
    StalePeriod { stored: Timestamp, incoming: Timestamp },

    #[error("period ends at {period_end}, not yet elapsed")]
    NotYetElapsed { period_end: Timestamp },
}

/// Locally reconciled subscription record.
///
/// # Invariants
///
/// - `current_period_start <= current_period_end`
/// - `current_period_end` never decreases except on cancellation
/// - `version` increases by one on every committed write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,

    /// Processor's subscription reference.
    pub external_subscription_id: String,

    /// Processor's price reference, kept even when no plan matches it.
    pub external_price_id: Option<String>,

    /// `None` when the price did not resolve to a catalog plan.
    pub plan_key: Option<PlanKey>,

    pub status: SubscriptionStatus,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub canceled_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Concurrency token for compare-and-set writes.
    pub version: i64,
}

impl Subscription {
    /// Builds a new record from a processor snapshot.
    pub fn from_snapshot(
        user_id: UserId,
        snapshot: &SubscriptionSnapshot,
        plan_key: Option<PlanKey>,
        period: BillingPeriod,
        now: Timestamp,
    ) -> Self {
        let status = snapshot.status.to_local();
        let canceled_at = if status == SubscriptionStatus::Canceled {
            Some(snapshot.canceled_at.unwrap_or(now))
        } else {
            None
        };

        Self {
            id: SubscriptionId::new(),
            user_id,
            external_subscription_id: snapshot.external_id.clone(),
            external_price_id: snapshot.price_id.clone(),
            plan_key,
            status,
            current_period_start: period.start,
            current_period_end: period.end,
            canceled_at,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Overwrites status, period, and plan from an authoritative snapshot.
    ///
    /// Fields absent from the snapshot keep their stored values. An older
    /// period than the stored one is rejected unless the snapshot reports
    /// cancellation.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &SubscriptionSnapshot,
        plan_key: Option<PlanKey>,
        now: Timestamp,
    ) -> Result<Change, TransformError> {
        let target = snapshot.status.to_local();
        self.check_transition(target)?;

        if let Some(period) = snapshot.period {
            if target != SubscriptionStatus::Canceled
                && period.end.is_before(&self.current_period_end)
            {
                return Err(TransformError::StalePeriod {
                    stored: self.current_period_end,
                    incoming: period.end,
                });
            }
        }

        let before = self.clone();

        self.status = target;
        if let Some(period) = snapshot.period {
            self.current_period_start = period.start;
            self.current_period_end = period.end;
        }
        if let Some(price_id) = &snapshot.price_id {
            self.external_price_id = Some(price_id.clone());
            self.plan_key = plan_key;
        }
        if target == SubscriptionStatus::Canceled {
            self.canceled_at = self.canceled_at.or(snapshot.canceled_at).or(Some(now));
        }

        Ok(self.settle(&before, now))
    }

    /// Marks the record canceled, stamping `at` on first cancellation.
    pub fn cancel(&mut self, at: Timestamp) -> Result<Change, TransformError> {
        if self.status == SubscriptionStatus::Canceled {
            return Ok(Change::Noop);
        }
        self.check_transition(SubscriptionStatus::Canceled)?;
        self.status = SubscriptionStatus::Canceled;
        self.canceled_at = Some(at);
        self.updated_at = at;
        Ok(Change::Applied)
    }

    /// Records a successful charge.
    pub fn mark_active(&mut self, now: Timestamp) -> Result<Change, TransformError> {
        self.set_status(SubscriptionStatus::Active, now)
    }

    /// Records a failed charge.
    pub fn mark_past_due(&mut self, now: Timestamp) -> Result<Change, TransformError> {
        self.set_status(SubscriptionStatus::PastDue, now)
    }

    /// Expires an `active` record whose period has elapsed at `now`.
    pub fn expire(&mut self, now: Timestamp) -> Result<Change, TransformError> {
        if self.status == SubscriptionStatus::Expired {
            return Ok(Change::Noop);
        }
        self.check_transition(SubscriptionStatus::Expired)?;
        if !self.current_period_end.is_before(&now) {
            return Err(TransformError::NotYetElapsed {
                period_end: self.current_period_end,
            });
        }
        self.status = SubscriptionStatus::Expired;
        self.updated_at = now;
        Ok(Change::Applied)
    }

    /// True while the user should be treated as a paying subscriber.
    pub fn is_current(&self, now: Timestamp) -> bool {
        match self.status {
            SubscriptionStatus::Trialing => true,
            SubscriptionStatus::Active => self.current_period_end.is_after(&now),
            _ => false,
        }
    }

    /// Whole days left in the current period, never negative.
    pub fn days_remaining(&self, now: Timestamp) -> i64 {
        self.current_period_end.days_until_ceil(&now).max(0)
    }

    fn set_status(
        &mut self,
        target: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<Change, TransformError> {
        if self.status == target {
            return Ok(Change::Noop);
        }
        self.check_transition(target)?;
        self.status = target;
        self.updated_at = now;
        Ok(Change::Applied)
    }

    fn check_transition(&self, target: SubscriptionStatus) -> Result<(), TransformError> {
        self.status
            .transition_to(target)
            .map(|_| ())
            .map_err(|_| TransformError::InvalidTransition {
                from: self.status,
                to: target,
            })
    }

    fn settle(&mut self, before: &Subscription, now: Timestamp) -> Change {
        if self == before {
            Change::Noop
        } else {
            self.updated_at = now;
            Change::Applied
        }
    }
}
