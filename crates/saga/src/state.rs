//! Booking saga steps and status.

use serde::{Deserialize, Serialize};

/// The step a booking saga is waiting to run.
///
/// Steps run in order:
/// ```text
/// ConfirmPayment ──► CreateSchedule ──► CreatePayout ──► Done
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum SagaStep {
    #[default]
    ConfirmPayment,
    CreateSchedule,
    CreatePayout,
    Done,
}

impl SagaStep {
    /// Returns the step that follows this one.
    pub fn next(&self) -> SagaStep {
        match self {
            SagaStep::ConfirmPayment => SagaStep::CreateSchedule,
            SagaStep::CreateSchedule => SagaStep::CreatePayout,
            SagaStep::CreatePayout | SagaStep::Done => SagaStep::Done,
        }
    }

    /// Returns the step name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::ConfirmPayment => "confirm_payment",
            SagaStep::CreateSchedule => "create_schedule",
            SagaStep::CreatePayout => "create_payout",
            SagaStep::Done => "done",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status of a booking saga.
///
/// State transitions:
/// ```text
/// Running ──┬──► Completed
///           └──► Failed ──► Running (resume)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    #[default]
    Running,

    /// Every step ran (terminal state).
    Completed,

    /// A step failed; earlier steps stay committed.
    Failed,
}

impl SagaStatus {
    /// Returns true if the saga can be driven again.
    pub fn can_resume(&self) -> bool {
        matches!(self, SagaStatus::Failed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "Running",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_advance_in_order() {
        assert_eq!(SagaStep::default(), SagaStep::ConfirmPayment);
        assert_eq!(SagaStep::ConfirmPayment.next(), SagaStep::CreateSchedule);
        assert_eq!(SagaStep::CreateSchedule.next(), SagaStep::CreatePayout);
        assert_eq!(SagaStep::CreatePayout.next(), SagaStep::Done);
        assert_eq!(SagaStep::Done.next(), SagaStep::Done);
        assert!(SagaStep::CreateSchedule < SagaStep::CreatePayout);
    }

    #[test]
    fn only_failed_sagas_resume() {
        assert!(SagaStatus::Failed.can_resume());
        assert!(!SagaStatus::Running.can_resume());
        assert!(!SagaStatus::Completed.can_resume());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(!SagaStatus::Failed.is_terminal());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&SagaStep::CreatePayout).unwrap();
        assert_eq!(json, "\"CreatePayout\"");
        let status: SagaStatus = serde_json::from_str("\"Failed\"").unwrap();
        assert_eq!(status, SagaStatus::Failed);
    }
}
