//! CheckSubscriptionHandler - Query handler for "is this user a paying subscriber".
//!
//! True for an `active` record whose period has not ended, or a `trialing`
//! record. A `past_due` record does not count; callers that want a grace
//! policy read the record itself.

use std::sync::Arc;

use crate::domain::foundation::{DomainError, UserId};
use crate::ports::{Clock, SubscriptionStore};

#[derive(Debug, Clone)]
pub struct CheckSubscriptionQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSubscriptionResult {
    pub is_active: bool,
}

pub struct CheckSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl CheckSubscriptionHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn handle(
        &self,
        query: CheckSubscriptionQuery,
    ) -> Result<CheckSubscriptionResult, DomainError> {
        let now = self.clock.now();
        let is_active = self
            .store
            .list_for_user(&query.user_id)
            .await?
            .iter()
            .any(|s| s.is_current(now));

        Ok(CheckSubscriptionResult { is_active })
    }
}
