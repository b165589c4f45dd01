//! Static plan catalog and the price → plan mapping.

use crate::domain::foundation::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog key of a plan, e.g. `monthly`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanKey(String);

impl PlanKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ValidationError::empty_field("plan_key"));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

/// A purchasable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub key: PlanKey,
    pub name: String,
    /// Price in the currency's minor unit.
    pub price_cents: i64,
    pub currency: String,
    pub interval: BillingInterval,
    /// Price reference at the payment processor.
    pub processor_price_id: String,
    pub is_active: bool,
}

/// Read-only catalog, seeded from configuration at startup.
///
/// Holds at most one active plan per key.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Result<Self, ValidationError> {
        for (i, plan) in plans.iter().enumerate() {
            let clash = plans[..i]
                .iter()
                .any(|other| other.is_active && plan.is_active && other.key == plan.key);
            if clash {
                return Err(ValidationError::duplicate("plan_key", plan.key.as_str()));
            }
        }
        Ok(Self { plans })
    }

    /// The two plans the product sells: `monthly` and `yearly`.
    pub fn standard(
        monthly_price_id: impl Into<String>,
        yearly_price_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::new(vec![
            Plan {
                key: PlanKey::new("monthly")?,
                name: "Monthly Plan".to_string(),
                price_cents: 2_000,
                currency: "usd".to_string(),
                interval: BillingInterval::Month,
                processor_price_id: monthly_price_id.into(),
                is_active: true,
            },
            Plan {
                key: PlanKey::new("yearly")?,
                name: "Yearly Plan".to_string(),
                price_cents: 20_000,
                currency: "usd".to_string(),
                interval: BillingInterval::Year,
                processor_price_id: yearly_price_id.into(),
                is_active: true,
            },
        ])
    }

    /// Finds the active plan billed under `price_id`.
    ///
    /// No fallback: an unknown price yields `None`.
    pub fn resolve_price(&self, price_id: &str) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|plan| plan.is_active && plan.processor_price_id == price_id)
    }

    pub fn by_key(&self, key: &str) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|plan| plan.is_active && plan.key.as_str() == key)
    }

    pub fn active_plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter().filter(|plan| plan.is_active)
    }
}
