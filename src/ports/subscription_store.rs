//! Subscription store port.
//!
//! Persistence for subscription records and the user lookups reconciliation
//! needs. Records are never deleted; cancellation and expiry are status
//! changes.
//!
//! # Concurrency contract
//!
//! - `compare_and_update` commits only if the stored `version` still equals
//!   the version the caller read, and bumps it by one on success.
//! - `insert_replacing_active` cancels the user's active-like records and
//!   inserts the new one as a single atomic unit. No other writer may
//!   observe the state between the two steps.
//! - `compare_and_update_replacing_active` is the conditional update for a
//!   record that becomes `active`: the user's other active-like records are
//!   canceled in the same unit, or nothing is written.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::domain::subscription::{Subscription, User};

/// Result of the atomic create path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was inserted. `replaced` holds the prior active-like
    /// records, as canceled by this operation.
    Inserted { replaced: Vec<Subscription> },

    /// A record with the same external reference already exists; nothing
    /// was written.
    AlreadyExists(Subscription),
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Lookup by the processor's subscription reference.
    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// The user's record in status `active`, if any.
    async fn find_active_for_user(&self, user_id: &UserId)
        -> Result<Option<Subscription>, DomainError>;

    /// All of the user's records, newest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError>;

    /// Lookup by the processor's customer reference.
    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, DomainError>;

    /// Atomically cancels the user's active-like records, stamping
    /// `canceled_at`, and inserts `subscription`.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` on persistence failure; nothing is written
    async fn insert_replacing_active(
        &self,
        subscription: &Subscription,
        canceled_at: Timestamp,
    ) -> Result<InsertOutcome, DomainError>;

    /// Conditional update keyed on the record's id.
    ///
    /// Returns `Ok(false)` when another writer committed first.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the record does not exist
    /// - `DatabaseError` on persistence failure
    async fn compare_and_update(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<bool, DomainError>;

    /// Conditional update that also cancels the user's other active-like
    /// records, stamping `canceled_at`.
    ///
    /// Returns `Ok(None)` when another writer committed first; nothing is
    /// written then. Otherwise returns the records canceled alongside.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the record does not exist
    /// - `DatabaseError` on persistence failure
    async fn compare_and_update_replacing_active(
        &self,
        subscription: &Subscription,
        expected_version: i64,
        canceled_at: Timestamp,
    ) -> Result<Option<Vec<Subscription>>, DomainError>;

    /// Records in status `active` with `current_period_end < cutoff`.
    async fn find_active_ending_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Records in status `active` with `current_period_end` in `[from, to]`.
    async fn find_active_ending_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError>;
}
