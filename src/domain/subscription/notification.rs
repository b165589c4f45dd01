//! Processor notification envelope and its typed payloads.
//!
//! The envelope is parsed first with the object left as raw JSON; the
//! declared `type` then picks exactly one payload struct to deserialize
//! it into. Only fields the reconciler reads are captured.

use serde::{Deserialize, Serialize};

use super::{BillingPeriod, ProcessorStatus, ReconcileError, SubscriptionSnapshot};
use crate::domain::foundation::Timestamp;

/// Notification envelope as delivered to the webhook endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Notification {
    /// Event identifier (evt_...).
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp of event creation.
    pub created: i64,

    #[serde(default)]
    pub livemode: bool,

    pub api_version: Option<String>,

    pub data: NotificationData,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationData {
    pub object: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

/// Notification types this system reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    CheckoutSessionCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    /// Anything else; acknowledged and ignored.
    Other,
}

impl NotificationType {
    pub fn parse(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutSessionCompleted => "checkout.session.completed",
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::Other => "other",
        }
    }
}

/// A notification resolved into its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutSessionCompleted(CheckoutSessionPayload),
    SubscriptionCreated(SubscriptionPayload),
    SubscriptionUpdated(SubscriptionPayload),
    SubscriptionDeleted(SubscriptionPayload),
    InvoicePaymentSucceeded(InvoicePayload),
    InvoicePaymentFailed(InvoicePayload),
    Ignored { event_type: String },
}

impl Notification {
    pub fn kind(&self) -> NotificationType {
        NotificationType::parse(&self.event_type)
    }

    /// Deserializes the object according to the declared type.
    ///
    /// # Errors
    ///
    /// `MalformedPayload` when a handled type carries an object missing
    /// required fields.
    pub fn into_event(self) -> Result<BillingEvent, ReconcileError> {
        let kind = self.kind();
        let object = self.data.object;
        let event = match kind {
            NotificationType::CheckoutSessionCompleted => {
                BillingEvent::CheckoutSessionCompleted(decode(kind, object)?)
            }
            NotificationType::SubscriptionCreated => {
                BillingEvent::SubscriptionCreated(decode(kind, object)?)
            }
            NotificationType::SubscriptionUpdated => {
                BillingEvent::SubscriptionUpdated(decode(kind, object)?)
            }
            NotificationType::SubscriptionDeleted => {
                BillingEvent::SubscriptionDeleted(decode(kind, object)?)
            }
            NotificationType::InvoicePaymentSucceeded => {
                BillingEvent::InvoicePaymentSucceeded(decode(kind, object)?)
            }
            NotificationType::InvoicePaymentFailed => {
                BillingEvent::InvoicePaymentFailed(decode(kind, object)?)
            }
            NotificationType::Other => BillingEvent::Ignored {
                event_type: self.event_type,
            },
        };
        Ok(event)
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: NotificationType,
    object: serde_json::Value,
) -> Result<T, ReconcileError> {
    serde_json::from_value(object)
        .map_err(|e| ReconcileError::MalformedPayload(format!("{}: {}", kind.as_str(), e)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Payloads
// ════════════════════════════════════════════════════════════════════════════════

/// Subscription object, shared by webhook payloads and processor queries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionPayload {
    /// Subscription reference (sub_...).
    pub id: String,

    /// Customer reference (cus_...).
    pub customer: String,

    pub status: ProcessorStatus,

    #[serde(default)]
    pub items: SubscriptionItems,

    /// Subscription-level period, present on older API versions.
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,

    pub canceled_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionItem {
    pub price: Option<PriceRef>,

    /// Item-level period, present on newer API versions.
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PriceRef {
    pub id: String,
}

impl SubscriptionPayload {
    /// Price of the first subscription item.
    pub fn price_id(&self) -> Option<&str> {
        self.items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
    }

    /// Current billing window, item-level first.
    ///
    /// Zero timestamps count as absent. Returns `Ok(None)` when neither
    /// level carries a period.
    pub fn period(&self) -> Result<Option<BillingPeriod>, ReconcileError> {
        let item = self.items.data.first();
        let pair = item
            .and_then(|i| both(i.current_period_start, i.current_period_end))
            .or_else(|| both(self.current_period_start, self.current_period_end));

        let Some((start, end)) = pair else {
            return Ok(None);
        };

        let start = unix(start, "current_period_start")?;
        let end = unix(end, "current_period_end")?;
        BillingPeriod::new(start, end).map(Some).ok_or_else(|| {
            ReconcileError::MalformedPayload(format!(
                "subscription {} period ends before it starts",
                self.id
            ))
        })
    }

    pub fn to_snapshot(&self) -> Result<SubscriptionSnapshot, ReconcileError> {
        let canceled_at = match self.canceled_at.filter(|secs| *secs > 0) {
            Some(secs) => Some(unix(secs, "canceled_at")?),
            None => None,
        };

        Ok(SubscriptionSnapshot {
            external_id: self.id.clone(),
            customer_id: self.customer.clone(),
            status: self.status,
            price_id: self.price_id().map(str::to_string),
            period: self.period()?,
            canceled_at,
        })
    }
}

fn both(start: Option<i64>, end: Option<i64>) -> Option<(i64, i64)> {
    match (start, end) {
        (Some(start), Some(end)) if start > 0 && end > 0 => Some((start, end)),
        _ => None,
    }
}

fn unix(secs: i64, field: &str) -> Result<Timestamp, ReconcileError> {
    Timestamp::from_unix_secs(secs)
        .ok_or_else(|| ReconcileError::MalformedPayload(format!("{} out of range: {}", field, secs)))
}

/// Invoice object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InvoicePayload {
    /// Invoice reference (in_...).
    pub id: String,

    pub customer: Option<String>,

    /// Subscription reference on older API versions.
    pub subscription: Option<String>,

    /// Subscription reference on newer API versions.
    pub parent: Option<InvoiceParent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InvoiceParent {
    pub subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InvoiceSubscriptionDetails {
    pub subscription: Option<String>,
}

impl InvoicePayload {
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_deref()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.subscription_details.as_ref())
                    .and_then(|d| d.subscription.as_deref())
            })
            .filter(|id| !id.is_empty())
    }
}

/// Checkout session object. Informational only.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CheckoutSessionPayload {
    /// Session reference (cs_...).
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub mode: Option<String>,
}
