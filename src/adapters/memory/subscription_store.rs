//! In-memory subscription store.
//!
//! One lock guards users and subscriptions together, so every operation,
//! including the create path's cancel-then-insert, is atomic. Used by tests
//! and by local runs without a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::{Subscription, SubscriptionStatus, User};
use crate::ports::{InsertOutcome, SubscriptionStore};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    /// Pending simulated losses for `compare_and_update`.
    injected_conflicts: u32,
    unavailable: bool,
}

impl State {
    fn check_available(&self) -> Result<(), DomainError> {
        if self.unavailable {
            Err(DomainError::new(ErrorCode::DatabaseError, "store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionStore {
    state: Arc<RwLock<State>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: User) {
        self.state.write().await.users.insert(user.id.clone(), user);
    }

    /// Stores a record as-is, bypassing the create path.
    pub async fn seed(&self, subscription: Subscription) {
        self.state
            .write()
            .await
            .subscriptions
            .insert(subscription.id, subscription);
    }

    /// Makes the next `count` conditional updates lose, as if a concurrent
    /// writer had committed in between.
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.write().await.injected_conflicts = count;
    }

    /// Makes every operation fail with `DatabaseError` while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn all_subscriptions(&self) -> Vec<Subscription> {
        let mut all: Vec<_> = self.state.read().await.subscriptions.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.subscriptions.len()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .subscriptions
            .values()
            .find(|s| s.external_subscription_id == external_subscription_id)
            .cloned())
    }

    async fn find_active_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| &s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.read().await;
        state.check_available()?;
        let mut records: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, DomainError> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .users
            .values()
            .find(|u| u.external_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn insert_replacing_active(
        &self,
        subscription: &Subscription,
        canceled_at: Timestamp,
    ) -> Result<InsertOutcome, DomainError> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if let Some(existing) = state
            .subscriptions
            .values()
            .find(|s| s.external_subscription_id == subscription.external_subscription_id)
        {
            return Ok(InsertOutcome::AlreadyExists(existing.clone()));
        }

        let mut replaced = Vec::new();
        for record in state.subscriptions.values_mut() {
            if record.user_id == subscription.user_id && record.status.is_active_like() {
                record.status = SubscriptionStatus::Canceled;
                record.canceled_at = Some(canceled_at);
                record.updated_at = canceled_at;
                record.version += 1;
                replaced.push(record.clone());
            }
        }

        state.subscriptions.insert(subscription.id, subscription.clone());
        Ok(InsertOutcome::Inserted { replaced })
    }

    async fn compare_and_update(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<bool, DomainError> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let injected = state.injected_conflicts > 0;
        if injected {
            state.injected_conflicts -= 1;
        }

        let stored = state.subscriptions.get_mut(&subscription.id).ok_or_else(|| {
            DomainError::new(ErrorCode::SubscriptionNotFound, "subscription not found")
                .with_detail("id", subscription.id.to_string())
        })?;

        if injected {
            stored.version += 1;
            return Ok(false);
        }
        if stored.version != expected_version {
            return Ok(false);
        }

        let mut updated = subscription.clone();
        updated.version = expected_version + 1;
        *stored = updated;
        Ok(true)
    }

    async fn compare_and_update_replacing_active(
        &self,
        subscription: &Subscription,
        expected_version: i64,
        canceled_at: Timestamp,
    ) -> Result<Option<Vec<Subscription>>, DomainError> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let injected = state.injected_conflicts > 0;
        if injected {
            state.injected_conflicts -= 1;
        }

        let stored = state.subscriptions.get_mut(&subscription.id).ok_or_else(|| {
            DomainError::new(ErrorCode::SubscriptionNotFound, "subscription not found")
                .with_detail("id", subscription.id.to_string())
        })?;

        if injected {
            stored.version += 1;
            return Ok(None);
        }
        if stored.version != expected_version {
            return Ok(None);
        }

        let mut updated = subscription.clone();
        updated.version = expected_version + 1;
        *stored = updated;

        let mut replaced = Vec::new();
        for record in state.subscriptions.values_mut() {
            if record.id != subscription.id
                && record.user_id == subscription.user_id
                && record.status.is_active_like()
            {
                record.status = SubscriptionStatus::Canceled;
                record.canceled_at = Some(canceled_at);
                record.updated_at = canceled_at;
                record.version += 1;
                replaced.push(record.clone());
            }
        }
        Ok(Some(replaced))
    }

    async fn find_active_ending_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.read().await;
        state.check_available()?;
        let mut due: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active && s.current_period_end < cutoff)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.current_period_end.cmp(&b.current_period_end));
        Ok(due)
    }

    async fn find_active_ending_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.read().await;
        state.check_available()?;
        let mut upcoming: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| {
                s.status == SubscriptionStatus::Active
                    && s.current_period_end >= from
                    && s.current_period_end <= to
            })
            .cloned()
            .collect();
        upcoming.sort_by(|a, b| a.current_period_end.cmp(&b.current_period_end));
        Ok(upcoming)
    }
}
