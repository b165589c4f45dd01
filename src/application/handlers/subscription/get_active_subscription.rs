//! GetActiveSubscriptionHandler - Query handler for a user's active subscription.

use std::sync::Arc;

use crate::domain::foundation::{DomainError, UserId};
use crate::domain::subscription::Subscription;
use crate::ports::SubscriptionStore;

#[derive(Debug, Clone)]
pub struct GetActiveSubscriptionQuery {
    pub user_id: UserId,
}

pub struct GetActiveSubscriptionHandler {
    store: Arc<dyn SubscriptionStore>,
}

impl GetActiveSubscriptionHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    /// Returns the user's record in status `active`, if any.
    pub async fn handle(
        &self,
        query: GetActiveSubscriptionQuery,
    ) -> Result<Option<Subscription>, DomainError> {
        self.store.find_active_for_user(&query.user_id).await
    }
}
