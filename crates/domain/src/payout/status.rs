//! Payout state machine.

use serde::{Deserialize, Serialize};

/// The status of a payout.
///
/// State transitions:
/// ```text
/// Pending    ──► Processing | Completed | Failed
/// Processing ──► Completed | Failed
/// Failed     ──► Processing (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PayoutStatus {
    /// Created, not yet sent to the provider.
    #[default]
    Pending,

    /// Transfer submitted to the provider.
    Processing,

    /// Money transferred (terminal state).
    Completed,

    /// Transfer failed; may be retried.
    Failed,
}

impl PayoutStatus {
    /// Returns true if the transition is in the table above.
    pub fn can_transition_to(&self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Completed | Failed)
                | (Processing, Completed | Failed)
                | (Failed, Processing)
        )
    }

    /// Returns true if a retry may re-submit the transfer.
    pub fn can_retry(&self) -> bool {
        matches!(self, PayoutStatus::Failed)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "Pending",
            PayoutStatus::Processing => "Processing",
            PayoutStatus::Completed => "Completed",
            PayoutStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PayoutStatus::*;

    const ALL: [PayoutStatus; 4] = [Pending, Processing, Completed, Failed];

    #[test]
    fn completed_is_terminal() {
        assert!(Completed.is_terminal());
        for next in ALL {
            assert!(!Completed.can_transition_to(next));
        }
    }

    #[test]
    fn failed_only_retries_to_processing() {
        assert!(Failed.can_retry());
        assert!(Failed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn forward_transitions() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Processing.can_retry());
    }
}
