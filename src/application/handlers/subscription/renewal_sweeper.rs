//! RenewalSweeper - reconciles locally elapsed subscriptions against the processor.
//!
//! A full sweep selects every `active` record whose period ended before `now`
//! and asks the processor for its authoritative state:
//!
//! - still `active`: the processor's period is written back (renewal)
//! - any other status, or unknown to the processor: the record is expired and
//!   the discrepancy reported
//! - query failure: counted, the batch continues
//!
//! A preview (`grace_days > 0`) only lists records ending within the window.
//!
//! Items run with bounded concurrency. A shutdown signal stops new items from
//! starting; items already started finish, and every finished item is
//! already committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::reconciler::SubscriptionReconciler;
use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{ProcessorStatus, ReconcileError, Subscription, SubscriptionStatus};
use crate::ports::{PaymentProcessor, SubscriptionStore};

pub const DEFAULT_SWEEP_CONCURRENCY: usize = 4;

/// Reported processor status for a subscription the processor does not know.
const MISSING: &str = "missing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    Full,
    Preview,
}

/// Local record expired because the processor disagreed with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub user_id: UserId,
    pub external_id: String,
    /// Processor status, or `missing` when the processor had no record.
    pub processor_status: String,
}

/// A subscription ending inside the preview window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingRenewal {
    pub user_id: UserId,
    pub external_id: String,
    pub current_period_end: Timestamp,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub mode: SweepMode,
    pub processed: usize,
    pub renewed: usize,
    pub expired: usize,
    pub failed: usize,
    pub affected_users: Vec<UserId>,
    pub discrepancies: Vec<Discrepancy>,
    pub upcoming: Vec<UpcomingRenewal>,
    /// True if a shutdown signal kept some selected items from starting.
    pub interrupted: bool,
}

impl SweepSummary {
    fn new(mode: SweepMode) -> Self {
        Self {
            mode,
            processed: 0,
            renewed: 0,
            expired: 0,
            failed: 0,
            affected_users: Vec::new(),
            discrepancies: Vec::new(),
            upcoming: Vec::new(),
            interrupted: false,
        }
    }
}

/// Outcome of reconciling one user on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RenewalCheck {
    NoSubscription,
    Active { days_remaining: i64 },
    Renewed { period_end: Timestamp },
    Expired,
}

/// Read-only renewal view of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenewalStatus {
    None,
    Active {
        external_id: String,
        period_end: Timestamp,
        days_remaining: i64,
    },
    Expired {
        external_id: String,
        period_end: Timestamp,
        days_since_expiry: i64,
    },
}

#[derive(Debug)]
enum ItemOutcome {
    Renewed(Subscription),
    Expired {
        subscription: Subscription,
        discrepancy: Discrepancy,
    },
    /// A concurrent writer settled the record first.
    Superseded,
}

pub struct RenewalSweeper {
    store: Arc<dyn SubscriptionStore>,
    processor: Arc<dyn PaymentProcessor>,
    reconciler: Arc<SubscriptionReconciler>,
    concurrency: usize,
}

impl RenewalSweeper {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        processor: Arc<dyn PaymentProcessor>,
        reconciler: Arc<SubscriptionReconciler>,
    ) -> Self {
        Self {
            store,
            processor,
            reconciler,
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs a full sweep (`grace_days == 0`) or a read-only preview.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the preview window runs past the representable range
    /// - a store error if the initial selection query fails
    ///
    /// Per-item failures are counted in the summary.
    pub async fn sweep(
        &self,
        now: Timestamp,
        grace_days: u32,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<SweepSummary, ReconcileError> {
        if grace_days > 0 {
            return self.preview(now, grace_days).await;
        }

        let due = self.store.find_active_ending_before(now).await?;
        info!(due = due.len(), now = %now, "Starting renewal sweep");

        let mut summary = SweepSummary::new(SweepMode::Full);
        let mut affected = BTreeSet::new();

        let results: Vec<Option<(Subscription, Result<ItemOutcome, ReconcileError>)>> =
            stream::iter(due)
                .map(|subscription| {
                    let shutdown = shutdown.clone();
                    async move {
                        if shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false) {
                            return None;
                        }
                        let result = self.reconcile_one(&subscription, now).await;
                        Some((subscription, result))
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for entry in results {
            let Some((subscription, result)) = entry else {
                summary.interrupted = true;
                continue;
            };
            summary.processed += 1;
            match result {
                Ok(ItemOutcome::Renewed(renewed)) => {
                    summary.renewed += 1;
                    affected.insert(renewed.user_id);
                }
                Ok(ItemOutcome::Expired {
                    subscription,
                    discrepancy,
                }) => {
                    summary.expired += 1;
                    affected.insert(subscription.user_id);
                    summary.discrepancies.push(discrepancy);
                }
                Ok(ItemOutcome::Superseded) => {}
                Err(e) => {
                    warn!(
                        external_id = %subscription.external_subscription_id,
                        user_id = %subscription.user_id,
                        error = %e,
                        "Renewal check failed for subscription"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary.affected_users = affected.into_iter().collect();
        summary
            .discrepancies
            .sort_by(|a, b| a.external_id.cmp(&b.external_id));

        info!(
            processed = summary.processed,
            renewed = summary.renewed,
            expired = summary.expired,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "Renewal sweep finished"
        );
        Ok(summary)
    }

    /// Reconciles one user's active subscription on demand.
    ///
    /// # Errors
    ///
    /// `ProcessorQueryFailed` or a store error if the record could not be
    /// reconciled.
    pub async fn check_user(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<RenewalCheck, ReconcileError> {
        let Some(subscription) = self.store.find_active_for_user(user_id).await? else {
            return Ok(RenewalCheck::NoSubscription);
        };

        if !subscription.current_period_end.is_before(&now) {
            return Ok(RenewalCheck::Active {
                days_remaining: subscription.days_remaining(now),
            });
        }

        match self.reconcile_one(&subscription, now).await? {
            ItemOutcome::Renewed(renewed) => Ok(RenewalCheck::Renewed {
                period_end: renewed.current_period_end,
            }),
            ItemOutcome::Expired { .. } => Ok(RenewalCheck::Expired),
            ItemOutcome::Superseded => match self.store.find_active_for_user(user_id).await? {
                Some(current) if current.is_current(now) => Ok(RenewalCheck::Active {
                    days_remaining: current.days_remaining(now),
                }),
                _ => Ok(RenewalCheck::Expired),
            },
        }
    }

    /// Read-only view of the user's renewal position.
    pub async fn renewal_status(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<RenewalStatus, ReconcileError> {
        if let Some(active) = self.store.find_active_for_user(user_id).await? {
            return Ok(RenewalStatus::Active {
                days_remaining: active.days_remaining(now),
                external_id: active.external_subscription_id,
                period_end: active.current_period_end,
            });
        }

        let latest_expired = self
            .store
            .list_for_user(user_id)
            .await?
            .into_iter()
            .find(|s| s.status == SubscriptionStatus::Expired);

        Ok(match latest_expired {
            Some(expired) => RenewalStatus::Expired {
                days_since_expiry: now.days_until_ceil(&expired.current_period_end).max(0),
                external_id: expired.external_subscription_id,
                period_end: expired.current_period_end,
            },
            None => RenewalStatus::None,
        })
    }

    async fn preview(&self, now: Timestamp, grace_days: u32) -> Result<SweepSummary, ReconcileError> {
        let until = now.checked_add_days(i64::from(grace_days)).ok_or_else(|| {
            ReconcileError::InvalidRequest(format!("preview window of {} days is out of range", grace_days))
        })?;
        let upcoming = self.store.find_active_ending_between(now, until).await?;

        let mut summary = SweepSummary::new(SweepMode::Preview);
        let mut affected = BTreeSet::new();
        for subscription in upcoming {
            affected.insert(subscription.user_id.clone());
            summary.upcoming.push(UpcomingRenewal {
                days_remaining: subscription.days_remaining(now),
                user_id: subscription.user_id,
                external_id: subscription.external_subscription_id,
                current_period_end: subscription.current_period_end,
            });
        }
        summary.processed = summary.upcoming.len();
        summary.affected_users = affected.into_iter().collect();

        info!(grace_days, upcoming = summary.processed, "Renewal preview finished");
        Ok(summary)
    }

    async fn reconcile_one(
        &self,
        subscription: &Subscription,
        now: Timestamp,
    ) -> Result<ItemOutcome, ReconcileError> {
        let external_id = subscription.external_subscription_id.as_str();

        let reported = self
            .processor
            .get_subscription(external_id)
            .await
            .map_err(|e| ReconcileError::ProcessorQueryFailed(format!("{}: {}", external_id, e)))?;

        let processor_status = match reported {
            Some(payload) if payload.status == ProcessorStatus::Active => {
                let snapshot = payload.to_snapshot()?;
                let outcome = self.reconciler.apply_snapshot(&snapshot).await?;
                debug!(external_id, "Processor confirmed renewal");
                return Ok(ItemOutcome::Renewed(outcome.subscription().clone()));
            }
            Some(payload) => payload.status.as_str().to_string(),
            None => MISSING.to_string(),
        };

        match self.reconciler.expire(external_id, now).await {
            Ok(outcome) => {
                info!(
                    external_id,
                    user_id = %subscription.user_id,
                    processor_status = %processor_status,
                    "Subscription expired after processor disagreed"
                );
                Ok(ItemOutcome::Expired {
                    discrepancy: Discrepancy {
                        user_id: subscription.user_id.clone(),
                        external_id: external_id.to_string(),
                        processor_status,
                    },
                    subscription: outcome.subscription().clone(),
                })
            }
            Err(e) if e.is_soft() => {
                debug!(external_id, reason = %e, "Record changed during sweep, leaving it");
                Ok(ItemOutcome::Superseded)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::FixedClock;
    use crate::adapters::memory::InMemorySubscriptionStore;
    use crate::adapters::stripe::MockPaymentProcessor;
    use crate::domain::subscription::{
        BillingPeriod, PlanCatalog, SubscriptionPayload, SubscriptionSnapshot,
    };
    use crate::ports::ProcessorError;
    use serde_json::json;

    fn ts(value: &str) -> Timestamp {
        Timestamp::parse_rfc3339(value).unwrap()
    }

    struct Fixture {
        store: Arc<InMemorySubscriptionStore>,
        processor: Arc<MockPaymentProcessor>,
        sweeper: RenewalSweeper,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        let clock = Arc::new(FixedClock::new(ts("2024-01-03T00:00:00Z")));
        let catalog = Arc::new(PlanCatalog::standard("price_month", "price_year").unwrap());
        let reconciler = Arc::new(SubscriptionReconciler::new(store.clone(), catalog, clock));
        let sweeper = RenewalSweeper::new(store.clone(), processor.clone(), reconciler);
        Fixture {
            store,
            processor,
            sweeper,
        }
    }

    async fn seed(store: &InMemorySubscriptionStore, user: &str, external_id: &str, end: &str) {
        let snapshot = SubscriptionSnapshot {
            external_id: external_id.to_string(),
            customer_id: format!("cus_{}", user),
            status: ProcessorStatus::Active,
            price_id: Some("price_month".to_string()),
            period: None,
            canceled_at: None,
        };
        let end = ts(end);
        let start = end.add_days(-31);
        store
            .seed(Subscription::from_snapshot(
                UserId::new(user).unwrap(),
                &snapshot,
                None,
                BillingPeriod::new(start, end).unwrap(),
                start,
            ))
            .await;
    }

    fn reported(id: &str, status: &str, start: &str, end: &str) -> SubscriptionPayload {
        serde_json::from_value(json!({
            "id": id,
            "customer": "cus_u",
            "status": status,
            "items": { "data": [{
                "price": { "id": "price_month" },
                "current_period_start": ts(start).as_unix_secs(),
                "current_period_end": ts(end).as_unix_secs()
            }]}
        }))
        .unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Full sweep
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn renews_when_processor_reports_active() {
        let f = fixture();
        seed(&f.store, "u", "sub_1", "2024-01-01T00:00:00Z").await;
        f.processor.set_subscription(reported(
            "sub_1",
            "active",
            "2024-01-01T00:00:00Z",
            "2024-02-01T00:00:00Z",
        ));

        let summary = f.sweeper.sweep(ts("2024-01-03T00:00:00Z"), 0, None).await.unwrap();

        assert_eq!(summary.mode, SweepMode::Full);
        assert_eq!((summary.processed, summary.renewed, summary.expired, summary.failed), (1, 1, 0, 0));
        let sub = f.store.find_by_external_id("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.current_period_end, ts("2024-02-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn expires_when_processor_reports_canceled() {
        let f = fixture();
        seed(&f.store, "u", "sub_1", "2024-01-01T00:00:00Z").await;
        f.processor.set_subscription(reported(
            "sub_1",
            "canceled",
            "2023-12-01T00:00:00Z",
            "2024-01-01T00:00:00Z",
        ));

        let summary = f.sweeper.sweep(ts("2024-01-03T00:00:00Z"), 0, None).await.unwrap();

        assert_eq!(summary.expired, 1);
        assert_eq!(summary.renewed, 0);
        assert_eq!(summary.discrepancies[0].processor_status, "canceled");
        assert_eq!(summary.affected_users, vec![UserId::new("u").unwrap()]);
        let sub = f.store.find_by_external_id("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn unknown_at_processor_expires_as_missing() {
        let f = fixture();
        seed(&f.store, "u", "sub_1", "2024-01-01T00:00:00Z").await;

        let summary = f.sweeper.sweep(ts("2024-01-03T00:00:00Z"), 0, None).await.unwrap();

        assert_eq!(summary.expired, 1);
        assert_eq!(summary.discrepancies[0].processor_status, "missing");
    }

    #[tokio::test]
    async fn query_failure_is_counted_and_batch_continues() {
        let f = fixture();
        seed(&f.store, "a", "sub_a", "2024-01-01T00:00:00Z").await;
        seed(&f.store, "b", "sub_b", "2024-01-02T00:00:00Z").await;
        f.processor.set_error("sub_a", ProcessorError::timeout("no answer"));
        f.processor.set_subscription(reported(
            "sub_b",
            "active",
            "2024-01-02T00:00:00Z",
            "2024-02-02T00:00:00Z",
        ));

        let summary = f.sweeper.sweep(ts("2024-01-03T00:00:00Z"), 0, None).await.unwrap();

        assert_eq!((summary.processed, summary.renewed, summary.failed), (2, 1, 1));
        let untouched = f.store.find_by_external_id("sub_a").await.unwrap().unwrap();
        assert_eq!(untouched.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn records_not_yet_elapsed_are_not_selected() {
        let f = fixture();
        seed(&f.store, "u", "sub_1", "2024-01-10T00:00:00Z").await;

        let summary = f.sweeper.sweep(ts("2024-01-03T00:00:00Z"), 0, None).await.unwrap();

        assert_eq!(summary.processed, 0);
        assert_eq!(f.processor.call_count("get_subscription"), 0);
    }

    #[tokio::test]
    async fn shutdown_before_start_processes_nothing() {
        let f = fixture();
        seed(&f.store, "u", "sub_1", "2024-01-01T00:00:00Z").await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let summary = f
            .sweeper
            .sweep(ts("2024-01-03T00:00:00Z"), 0, Some(rx))
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.processed, 0);
        let sub = f.store.find_by_external_id("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn processor_queries_stay_within_concurrency_limit() {
        let f = fixture();
        for i in 0..6 {
            seed(&f.store, &format!("u{}", i), &format!("sub_{}", i), "2024-01-01T00:00:00Z").await;
        }
        f.processor.set_delay(std::time::Duration::from_millis(20));
        let sweeper = f.sweeper.with_concurrency(2);

        let summary = sweeper.sweep(ts("2024-01-03T00:00:00Z"), 0, None).await.unwrap();

        assert_eq!(summary.processed, 6);
        assert_eq!(f.processor.call_count("get_subscription"), 6);
        assert_eq!(f.processor.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn selection_failure_aborts_sweep() {
        let f = fixture();
        f.store.set_unavailable(true).await;

        let err = f.sweeper.sweep(ts("2024-01-03T00:00:00Z"), 0, None).await.unwrap_err();

        assert!(matches!(err, ReconcileError::Store(_)));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Preview
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn preview_lists_upcoming_without_writing() {
        let f = fixture();
        seed(&f.store, "soon", "sub_soon", "2024-01-05T00:00:00Z").await;
        seed(&f.store, "later", "sub_later", "2024-03-01T00:00:00Z").await;
        seed(&f.store, "past", "sub_past", "2024-01-01T00:00:00Z").await;

        let summary = f.sweeper.sweep(ts("2024-01-03T00:00:00Z"), 7, None).await.unwrap();

        assert_eq!(summary.mode, SweepMode::Preview);
        assert_eq!(summary.upcoming.len(), 1);
        assert_eq!(summary.upcoming[0].external_id, "sub_soon");
        assert_eq!(summary.upcoming[0].days_remaining, 2);
        assert_eq!((summary.renewed, summary.expired), (0, 0));
        assert_eq!(f.processor.call_count("get_subscription"), 0);
    }

    #[tokio::test]
    async fn preview_window_past_representable_range_is_rejected() {
        let f = fixture();
        seed(&f.store, "u", "sub_1", "2024-01-05T00:00:00Z").await;

        let err = f
            .sweeper
            .sweep(ts("2024-01-03T00:00:00Z"), u32::MAX, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::InvalidRequest(_)));
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Per-user
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn check_user_reports_each_case() {
        let f = fixture();
        let now = ts("2024-01-03T00:00:00Z");

        let none = f.sweeper.check_user(&UserId::new("nobody").unwrap(), now).await.unwrap();
        assert_eq!(none, RenewalCheck::NoSubscription);

        seed(&f.store, "current", "sub_c", "2024-01-10T00:00:00Z").await;
        let active = f.sweeper.check_user(&UserId::new("current").unwrap(), now).await.unwrap();
        assert_eq!(active, RenewalCheck::Active { days_remaining: 7 });

        seed(&f.store, "lapsed", "sub_l", "2024-01-01T00:00:00Z").await;
        f.processor.set_subscription(reported(
            "sub_l",
            "active",
            "2024-01-01T00:00:00Z",
            "2024-02-01T00:00:00Z",
        ));
        let renewed = f.sweeper.check_user(&UserId::new("lapsed").unwrap(), now).await.unwrap();
        assert_eq!(
            renewed,
            RenewalCheck::Renewed {
                period_end: ts("2024-02-01T00:00:00Z")
            }
        );
    }

    #[tokio::test]
    async fn renewal_status_reports_expiry_age() {
        let f = fixture();
        seed(&f.store, "u", "sub_1", "2024-01-01T00:00:00Z").await;
        let _ = f.sweeper.sweep(ts("2024-01-03T00:00:00Z"), 0, None).await.unwrap();

        let status = f
            .sweeper
            .renewal_status(&UserId::new("u").unwrap(), ts("2024-01-03T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(
            status,
            RenewalStatus::Expired {
                external_id: "sub_1".to_string(),
                period_end: ts("2024-01-01T00:00:00Z"),
                days_since_expiry: 2,
            }
        );
    }
}
