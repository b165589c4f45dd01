//! State machine trait for status enums.

use super::ValidationError;

/// A status enum with an explicit transition table.
///
/// Re-entering the current state is always accepted by `transition_to`, so
/// replaying an event that lands on the same status is a no-op rather than
/// an error.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Returns true if moving from self to a *different* target is allowed.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all valid target states from current state, excluding self.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Performs transition with validation, returning error if invalid.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if *self == target || self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Checks if current state is terminal (no valid outgoing transitions).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Door {
        Open,
        Closed,
        Welded,
    }

    impl StateMachine for Door {
        fn can_transition_to(&self, target: &Self) -> bool {
            self.valid_transitions().contains(target)
        }

        fn valid_transitions(&self) -> Vec<Self> {
            match self {
                Door::Open => vec![Door::Closed],
                Door::Closed => vec![Door::Open, Door::Welded],
                Door::Welded => vec![],
            }
        }
    }

    #[test]
    fn transition_to_succeeds_for_listed_target() {
        assert_eq!(Door::Open.transition_to(Door::Closed), Ok(Door::Closed));
    }

    #[test]
    fn transition_to_fails_for_unlisted_target() {
        assert!(Door::Open.transition_to(Door::Welded).is_err());
    }

    #[test]
    fn transition_to_same_state_is_accepted_even_when_terminal() {
        assert_eq!(Door::Welded.transition_to(Door::Welded), Ok(Door::Welded));
    }

    #[test]
    fn is_terminal_follows_valid_transitions() {
        assert!(Door::Welded.is_terminal());
        assert!(!Door::Closed.is_terminal());
    }
}
