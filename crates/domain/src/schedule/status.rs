//! Schedule state machine.

use serde::{Deserialize, Serialize};

/// The status of a schedule.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Completed
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ScheduleStatus {
    /// Booked, awaiting vendor confirmation.
    #[default]
    Pending,

    /// Vendor accepted the booking.
    Confirmed,

    /// Service delivered (terminal state).
    Completed,

    /// Booking called off (terminal state).
    Cancelled,
}

impl ScheduleStatus {
    /// Returns true if the transition is in the table above.
    pub fn can_transition_to(&self, next: ScheduleStatus) -> bool {
        use ScheduleStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled) | (Confirmed, Completed | Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduleStatus::Completed | ScheduleStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "Pending",
            ScheduleStatus::Confirmed => "Confirmed",
            ScheduleStatus::Completed => "Completed",
            ScheduleStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScheduleStatus::*;

    #[test]
    fn transition_table() {
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
    }

    #[test]
    fn terminal_states() {
        assert!(!Pending.is_terminal());
        assert!(!Confirmed.is_terminal());
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
    }
}
