//! Subscription status state machine.
//!
//! `SubscriptionStatus` is the locally persisted lifecycle. `ProcessorStatus`
//! is the vocabulary the payment processor reports, which is wider than ours
//! and never contains `expired`.

use crate::domain::foundation::{StateMachine, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a locally reconciled subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created at the processor, first payment not yet confirmed.
    Incomplete,

    /// In a free trial window.
    Trialing,

    /// Paid for the current period.
    Active,

    /// Latest charge failed; the processor is retrying.
    PastDue,

    /// Ended by the user, the processor, or a plan switch. Terminal.
    Canceled,

    /// Period elapsed locally without processor confirmation of renewal.
    /// Never reported by the processor.
    Expired,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 6] = [
        SubscriptionStatus::Incomplete,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Expired,
    ];

    /// Statuses that occupy the user's single "current subscription" slot.
    ///
    /// A new subscription for the same user cancels any record in one of
    /// these statuses.
    pub fn is_active_like(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trialing | SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                ValidationError::invalid_format("status", format!("unknown status '{}'", s))
            })
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Incomplete => vec![Trialing, Active, PastDue, Canceled],
            Trialing => vec![Active, PastDue, Canceled],
            Active => vec![PastDue, Canceled, Expired],
            PastDue => vec![Active, Canceled],
            // Reactivation only through a processor-confirmed renewal; the
            // reconciler never infers it.
            Expired => vec![Active, Canceled],
            Canceled => vec![],
        }
    }
}

/// Subscription status as reported by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
    #[serde(other)]
    Unknown,
}

impl ProcessorStatus {
    /// Maps the processor's vocabulary onto the local lifecycle.
    pub fn to_local(self) -> SubscriptionStatus {
        match self {
            ProcessorStatus::Incomplete | ProcessorStatus::Unknown => SubscriptionStatus::Incomplete,
            ProcessorStatus::IncompleteExpired | ProcessorStatus::Canceled => {
                SubscriptionStatus::Canceled
            }
            ProcessorStatus::Trialing => SubscriptionStatus::Trialing,
            ProcessorStatus::Active => SubscriptionStatus::Active,
            ProcessorStatus::PastDue | ProcessorStatus::Unpaid | ProcessorStatus::Paused => {
                SubscriptionStatus::PastDue
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorStatus::Incomplete => "incomplete",
            ProcessorStatus::IncompleteExpired => "incomplete_expired",
            ProcessorStatus::Trialing => "trialing",
            ProcessorStatus::Active => "active",
            ProcessorStatus::PastDue => "past_due",
            ProcessorStatus::Canceled => "canceled",
            ProcessorStatus::Unpaid => "unpaid",
            ProcessorStatus::Paused => "paused",
            ProcessorStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionStatus::*;

    // ════════════════════════════════════════════════════════════════════════════
    // State transitions
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn incomplete_can_become_active_or_past_due() {
        assert_eq!(Incomplete.transition_to(Active), Ok(Active));
        assert_eq!(Incomplete.transition_to(PastDue), Ok(PastDue));
    }

    #[test]
    fn active_can_become_past_due_canceled_or_expired() {
        for target in [PastDue, Canceled, Expired] {
            assert!(Active.can_transition_to(&target), "active -> {:?}", target);
        }
    }

    #[test]
    fn past_due_recovers_to_active() {
        assert_eq!(PastDue.transition_to(Active), Ok(Active));
    }

    #[test]
    fn past_due_cannot_expire_directly() {
        assert!(PastDue.transition_to(Expired).is_err());
    }

    #[test]
    fn expired_can_be_renewed_to_active() {
        assert_eq!(Expired.transition_to(Active), Ok(Active));
    }

    #[test]
    fn expired_cannot_go_back_to_past_due() {
        assert!(Expired.transition_to(PastDue).is_err());
    }

    #[test]
    fn canceled_is_terminal() {
        assert!(Canceled.is_terminal());
        for target in [Incomplete, Trialing, Active, PastDue, Expired] {
            assert!(Canceled.transition_to(target).is_err(), "canceled -> {:?}", target);
        }
    }

    #[test]
    fn self_transitions_are_accepted() {
        for status in SubscriptionStatus::ALL {
            assert_eq!(status.transition_to(status), Ok(status));
        }
    }

    #[test]
    fn only_canceled_is_terminal() {
        for status in SubscriptionStatus::ALL {
            assert_eq!(status.is_terminal(), status == Canceled, "{:?}", status);
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Classification and parsing
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn active_like_covers_trialing_active_and_past_due() {
        let active_like: Vec<_> = SubscriptionStatus::ALL
            .into_iter()
            .filter(|s| s.is_active_like())
            .collect();
        assert_eq!(active_like, vec![Trialing, Active, PastDue]);
    }

    #[test]
    fn status_parses_from_its_string_form() {
        for status in SubscriptionStatus::ALL {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn status_serializes_as_snake_case() {
        assert_eq!(serde_json::to_string(&PastDue).unwrap(), "\"past_due\"");
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Processor vocabulary
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn processor_status_maps_onto_local_lifecycle() {
        assert_eq!(ProcessorStatus::Active.to_local(), Active);
        assert_eq!(ProcessorStatus::Trialing.to_local(), Trialing);
        assert_eq!(ProcessorStatus::IncompleteExpired.to_local(), Canceled);
        assert_eq!(ProcessorStatus::Unpaid.to_local(), PastDue);
        assert_eq!(ProcessorStatus::Paused.to_local(), PastDue);
    }

    #[test]
    fn processor_never_yields_expired() {
        let all = [
            ProcessorStatus::Incomplete,
            ProcessorStatus::IncompleteExpired,
            ProcessorStatus::Trialing,
            ProcessorStatus::Active,
            ProcessorStatus::PastDue,
            ProcessorStatus::Canceled,
            ProcessorStatus::Unpaid,
            ProcessorStatus::Paused,
            ProcessorStatus::Unknown,
        ];
        assert!(all.iter().all(|s| s.to_local() != Expired));
    }

    #[test]
    fn unrecognized_processor_status_deserializes_as_unknown() {
        let status: ProcessorStatus = serde_json::from_str("\"on_hold\"").unwrap();
        assert_eq!(status, ProcessorStatus::Unknown);
        assert_eq!(status.to_local(), Incomplete);
    }
}
