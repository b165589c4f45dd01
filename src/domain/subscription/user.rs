//! User as seen by subscription reconciliation.

use crate::domain::foundation::UserId;
use serde::{Deserialize, Serialize};

/// Account identity plus the payment processor's customer handle.
///
/// The customer reference is filled in on first checkout, so users who
/// never paid have `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub external_customer_id: Option<String>,
}

impl User {
    pub fn new(id: UserId, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            external_customer_id: None,
        }
    }

    pub fn with_customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.external_customer_id = Some(customer_id.into());
        self
    }
}
