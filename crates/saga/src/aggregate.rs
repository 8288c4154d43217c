//! Booking saga record.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, OrderCode};
use serde::{Deserialize, Serialize};
use store::UniqueKey;

use crate::error::{Result, SagaError};
use crate::events::{
    PayoutSkippedData, SagaCompletedData, SagaEvent, SagaResumedData, SagaStartedData,
};
use crate::state::{SagaStatus, SagaStep};

/// Progress of one paid payment through schedule and payout creation.
///
/// One record per payment. Every step outcome is saved in its own unit of
/// work, so the record shows how far the booking got even when a later step
/// failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingSaga {
    id: Option<AggregateId>,
    payment_id: Option<AggregateId>,
    order_code: Option<OrderCode>,
    step: SagaStep,
    status: SagaStatus,
    schedule_id: Option<AggregateId>,
    payout_id: Option<AggregateId>,
    payout_skipped: bool,
    /// Error of the last failed step, cleared on resume.
    last_error: Option<String>,
    failed_step: Option<SagaStep>,
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
}

impl Aggregate for BookingSaga {
    type Event = SagaEvent;
    type Error = SagaError;

    fn aggregate_type() -> &'static str {
        "BookingSaga"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id);
                self.payment_id = Some(data.payment_id);
                self.order_code = data.order_code;
                self.step = SagaStep::ConfirmPayment;
                self.status = SagaStatus::Running;
                self.attempts = 1;
                self.started_at = Some(data.started_at);
            }
            SagaEvent::StepCompleted(data) => {
                if data.schedule_id.is_some() {
                    self.schedule_id = data.schedule_id;
                }
                if data.payout_id.is_some() {
                    self.payout_id = data.payout_id;
                }
                self.step = data.step.next();
            }
            SagaEvent::PayoutSkipped(_) => {
                self.payout_skipped = true;
                self.step = SagaStep::Done;
            }
            SagaEvent::StepFailed(data) => {
                self.status = SagaStatus::Failed;
                self.failed_step = Some(data.step);
                self.last_error = Some(data.error);
            }
            SagaEvent::SagaResumed(data) => {
                self.status = SagaStatus::Running;
                self.attempts = data.attempt;
                self.failed_step = None;
                self.last_error = None;
            }
            SagaEvent::SagaCompleted(_) => {
                self.status = SagaStatus::Completed;
            }
        }
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        self.payment_id
            .map(Self::payment_key)
            .into_iter()
            .collect()
    }
}

// Query methods
impl BookingSaga {
    /// Unique key tying a saga to its payment.
    pub fn payment_key(payment_id: AggregateId) -> UniqueKey {
        UniqueKey::new("payment_id", payment_id)
    }

    pub fn payment_id(&self) -> Option<AggregateId> {
        self.payment_id
    }

    pub fn order_code(&self) -> Option<OrderCode> {
        self.order_code
    }

    /// Returns the step the saga runs next.
    pub fn step(&self) -> SagaStep {
        self.step
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn schedule_id(&self) -> Option<AggregateId> {
        self.schedule_id
    }

    pub fn payout_id(&self) -> Option<AggregateId> {
        self.payout_id
    }

    /// Returns true if the vendor had no bank account and no payout was made.
    pub fn payout_skipped(&self) -> bool {
        self.payout_skipped
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn failed_step(&self) -> Option<SagaStep> {
        self.failed_step
    }

    /// Number of times the saga was driven.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

// Decisions
impl BookingSaga {
    /// Opens the saga for a payment that just became paid.
    pub fn start(
        &self,
        saga_id: AggregateId,
        payment_id: AggregateId,
        order_code: Option<OrderCode>,
    ) -> Result<Vec<SagaEvent>> {
        if self.id.is_some() {
            return Err(SagaError::AlreadyStarted);
        }
        Ok(vec![
            SagaEvent::SagaStarted(SagaStartedData {
                saga_id,
                payment_id,
                order_code,
                started_at: Utc::now(),
            }),
            SagaEvent::step_completed(SagaStep::ConfirmPayment, None, None),
        ])
    }

    /// Records the schedule booked for the payment.
    ///
    /// Recording the same schedule twice is a no-op.
    pub fn schedule_created(&self, schedule_id: AggregateId) -> Result<Vec<SagaEvent>> {
        if self.schedule_id == Some(schedule_id) {
            return Ok(Vec::new());
        }
        self.expect_step(SagaStep::CreateSchedule)?;
        Ok(vec![SagaEvent::step_completed(
            SagaStep::CreateSchedule,
            Some(schedule_id),
            None,
        )])
    }

    /// Records the payout created for the schedule.
    ///
    /// Recording the same payout twice is a no-op.
    pub fn payout_created(&self, payout_id: AggregateId) -> Result<Vec<SagaEvent>> {
        if self.payout_id == Some(payout_id) {
            return Ok(Vec::new());
        }
        self.expect_step(SagaStep::CreatePayout)?;
        Ok(vec![SagaEvent::step_completed(
            SagaStep::CreatePayout,
            None,
            Some(payout_id),
        )])
    }

    /// Moves past the payout step without a payout.
    pub fn skip_payout(&self, reason: impl Into<String>) -> Result<Vec<SagaEvent>> {
        if self.payout_skipped {
            return Ok(Vec::new());
        }
        self.expect_step(SagaStep::CreatePayout)?;
        Ok(vec![SagaEvent::PayoutSkipped(PayoutSkippedData {
            reason: reason.into(),
            skipped_at: Utc::now(),
        })])
    }

    /// Records a failed step. Earlier steps are left as they are.
    pub fn fail(&self, step: SagaStep, error: impl Into<String>) -> Result<Vec<SagaEvent>> {
        self.ensure_running()?;
        Ok(vec![SagaEvent::step_failed(step, error)])
    }

    /// Drives a failed saga again from the step that failed.
    pub fn resume(&self) -> Result<Vec<SagaEvent>> {
        if self.id.is_none() {
            return Err(SagaError::NotStarted);
        }
        if !self.status.can_resume() {
            return Err(SagaError::NotResumable {
                status: self.status,
            });
        }
        Ok(vec![SagaEvent::SagaResumed(SagaResumedData {
            attempt: self.attempts + 1,
            resumed_at: Utc::now(),
        })])
    }

    /// Closes the saga once every step ran.
    pub fn complete(&self) -> Result<Vec<SagaEvent>> {
        if self.status == SagaStatus::Completed {
            return Ok(Vec::new());
        }
        self.expect_step(SagaStep::Done)?;
        Ok(vec![SagaEvent::SagaCompleted(SagaCompletedData {
            completed_at: Utc::now(),
        })])
    }

    fn ensure_running(&self) -> Result<()> {
        if self.id.is_none() {
            return Err(SagaError::NotStarted);
        }
        if self.status != SagaStatus::Running {
            return Err(SagaError::NotRunning {
                status: self.status,
            });
        }
        Ok(())
    }

    fn expect_step(&self, expected: SagaStep) -> Result<()> {
        self.ensure_running()?;
        if self.step != expected {
            return Err(SagaError::OutOfOrder {
                expected,
                actual: self.step,
            });
        }
        Ok(())
    }
}
