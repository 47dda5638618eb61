//! Checkout state machine.

use serde::{Deserialize, Serialize};

/// The state of a checkout attempt.
///
/// State transitions:
/// ```text
/// Pending ─► Validating ─► Reserving ─► LockingPrices ─► Authorizing
///    ─► CreatingOrder ─► Capturing ─► Committing ─► Completed
///
/// any non-terminal state ─► Failed
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    #[default]
    Pending,
    Validating,
    Reserving,
    LockingPrices,
    Authorizing,
    CreatingOrder,
    Capturing,
    Committing,
    /// Terminal.
    Completed,
    /// Terminal.
    Failed,
}

impl CheckoutState {
    pub const ALL: [CheckoutState; 10] = [
        CheckoutState::Pending,
        CheckoutState::Validating,
        CheckoutState::Reserving,
        CheckoutState::LockingPrices,
        CheckoutState::Authorizing,
        CheckoutState::CreatingOrder,
        CheckoutState::Capturing,
        CheckoutState::Committing,
        CheckoutState::Completed,
        CheckoutState::Failed,
    ];

    /// The state the happy path moves to next, if any.
    pub fn next(&self) -> Option<CheckoutState> {
        match self {
            CheckoutState::Pending => Some(CheckoutState::Validating),
            CheckoutState::Validating => Some(CheckoutState::Reserving),
            CheckoutState::Reserving => Some(CheckoutState::LockingPrices),
            CheckoutState::LockingPrices => Some(CheckoutState::Authorizing),
            CheckoutState::Authorizing => Some(CheckoutState::CreatingOrder),
            CheckoutState::CreatingOrder => Some(CheckoutState::Capturing),
            CheckoutState::Capturing => Some(CheckoutState::Committing),
            CheckoutState::Committing => Some(CheckoutState::Completed),
            CheckoutState::Completed | CheckoutState::Failed => None,
        }
    }

    /// Returns true if `to` is a legal single step from this state.
    pub fn can_transition_to(&self, to: CheckoutState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == CheckoutState::Failed || self.next() == Some(to)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Completed | CheckoutState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Pending => "pending",
            CheckoutState::Validating => "validating",
            CheckoutState::Reserving => "reserving",
            CheckoutState::LockingPrices => "locking_prices",
            CheckoutState::Authorizing => "authorizing",
            CheckoutState::CreatingOrder => "creating_order",
            CheckoutState::Capturing => "capturing",
            CheckoutState::Committing => "committing",
            CheckoutState::Completed => "completed",
            CheckoutState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CheckoutState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckoutState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown checkout state: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_pending() {
        assert_eq!(CheckoutState::default(), CheckoutState::Pending);
    }

    #[test]
    fn test_happy_path_is_strictly_increasing() {
        let mut state = CheckoutState::Pending;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            assert!(state.can_transition_to(next));
            state = next;
            visited.push(state);
        }
        assert_eq!(state, CheckoutState::Completed);
        assert_eq!(visited.len(), 9);
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_state() {
        for state in CheckoutState::ALL {
            assert_eq!(
                state.can_transition_to(CheckoutState::Failed),
                !state.is_terminal(),
                "{state}"
            );
        }
    }

    #[test]
    fn test_no_backward_or_skipping_transitions() {
        assert!(!CheckoutState::Reserving.can_transition_to(CheckoutState::Validating));
        assert!(!CheckoutState::Reserving.can_transition_to(CheckoutState::Authorizing));
        assert!(!CheckoutState::Completed.can_transition_to(CheckoutState::Failed));
        assert!(!CheckoutState::Failed.can_transition_to(CheckoutState::Pending));
    }

    #[test]
    fn test_string_round_trip() {
        for state in CheckoutState::ALL {
            assert_eq!(state.as_str().parse::<CheckoutState>().unwrap(), state);
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
        assert!("shipping".parse::<CheckoutState>().is_err());
    }
}
