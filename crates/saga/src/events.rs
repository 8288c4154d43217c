//! Booking saga events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{DomainEvent, OrderCode};
use serde::{Deserialize, Serialize};

use crate::state::SagaStep;

/// Events recorded on a booking saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// The saga was opened for a paid payment.
    SagaStarted(SagaStartedData),

    /// A step finished and the saga moved to the next one.
    StepCompleted(StepCompletedData),

    /// The payout step was skipped; the saga moved to Done.
    PayoutSkipped(PayoutSkippedData),

    /// A step failed.
    StepFailed(StepFailedData),

    /// A failed saga is being driven again.
    SagaResumed(SagaResumedData),

    /// Every step ran.
    SagaCompleted(SagaCompletedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepCompleted(_) => "SagaStepCompleted",
            SagaEvent::PayoutSkipped(_) => "SagaPayoutSkipped",
            SagaEvent::StepFailed(_) => "SagaStepFailed",
            SagaEvent::SagaResumed(_) => "SagaResumed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
        }
    }
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: AggregateId,
    pub payment_id: AggregateId,
    pub order_code: Option<OrderCode>,
    pub started_at: DateTime<Utc>,
}

/// Data for StepCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step: SagaStep,
    /// Set when the schedule step completed.
    pub schedule_id: Option<AggregateId>,
    /// Set when the payout step completed.
    pub payout_id: Option<AggregateId>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSkippedData {
    pub reason: String,
    pub skipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step: SagaStep,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaResumedData {
    /// 1 for the first run, incremented by every resume.
    pub attempt: u32,
    pub resumed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub completed_at: DateTime<Utc>,
}

impl SagaEvent {
    pub fn step_completed(
        step: SagaStep,
        schedule_id: Option<AggregateId>,
        payout_id: Option<AggregateId>,
    ) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step,
            schedule_id,
            payout_id,
            completed_at: Utc::now(),
        })
    }

    pub fn step_failed(step: SagaStep, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step,
            error: error.into(),
            failed_at: Utc::now(),
        })
    }
}
