//! Payout aggregate implementation.

use chrono::Utc;
use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::UniqueKey;

use crate::aggregate::Aggregate;
use crate::value_objects::{BankAccount, Money};

use super::events::{
    PayoutCompletedData, PayoutCreatedData, PayoutFailedData, PayoutProcessingData,
    PayoutTransferAcceptedData,
};
use super::{PayoutError, PayoutEvent, PayoutStatus};

/// Everything a payout is created from.
#[derive(Debug, Clone)]
pub struct PayoutDraft {
    pub vendor_id: AggregateId,
    pub payment_id: Option<AggregateId>,
    pub schedule_id: Option<AggregateId>,
    pub amount: Money,
    pub bank_account: BankAccount,
}

/// Payout aggregate root: money owed to a vendor and its transfer state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payout {
    id: Option<AggregateId>,
    vendor_id: Option<AggregateId>,
    payment_id: Option<AggregateId>,
    schedule_id: Option<AggregateId>,
    amount: Money,
    bank_account: Option<BankAccount>,
    status: PayoutStatus,
    transfer_id: Option<String>,
    failure_reason: Option<String>,
    attempts: u32,
}

impl Aggregate for Payout {
    type Event = PayoutEvent;
    type Error = PayoutError;

    fn aggregate_type() -> &'static str {
        "Payout"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PayoutEvent::PayoutCreated(data) => {
                self.id = Some(data.payout_id);
                self.vendor_id = Some(data.vendor_id);
                self.payment_id = data.payment_id;
                self.schedule_id = data.schedule_id;
                self.amount = data.amount;
                self.bank_account = Some(data.bank_account);
                self.status = PayoutStatus::Pending;
            }
            PayoutEvent::PayoutProcessing(data) => {
                self.status = PayoutStatus::Processing;
                self.attempts = data.attempt;
                self.failure_reason = None;
            }
            PayoutEvent::PayoutTransferAccepted(data) => {
                self.transfer_id = Some(data.transfer_id);
            }
            PayoutEvent::PayoutCompleted(data) => {
                self.status = PayoutStatus::Completed;
                if data.transfer_id.is_some() {
                    self.transfer_id = data.transfer_id;
                }
            }
            PayoutEvent::PayoutFailed(data) => {
                self.status = PayoutStatus::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        self.schedule_id
            .map(Self::schedule_key)
            .into_iter()
            .collect()
    }
}

impl Payout {
    /// Unique key tying a payout to the schedule it pays for.
    pub fn schedule_key(schedule_id: AggregateId) -> UniqueKey {
        UniqueKey::new("schedule_id", schedule_id)
    }

    pub fn vendor_id(&self) -> Option<AggregateId> {
        self.vendor_id
    }

    pub fn payment_id(&self) -> Option<AggregateId> {
        self.payment_id
    }

    pub fn schedule_id(&self) -> Option<AggregateId> {
        self.schedule_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn bank_account(&self) -> Option<&BankAccount> {
        self.bank_account.as_ref()
    }

    pub fn status(&self) -> PayoutStatus {
        self.status
    }

    pub fn transfer_id(&self) -> Option<&str> {
        self.transfer_id.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Number of times the transfer was submitted.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn create(
        &self,
        payout_id: AggregateId,
        draft: PayoutDraft,
    ) -> Result<Vec<PayoutEvent>, PayoutError> {
        if self.id.is_some() {
            return Err(PayoutError::AlreadyCreated);
        }
        if !draft.amount.is_positive() {
            return Err(PayoutError::InvalidAmount(draft.amount));
        }
        if !draft.bank_account.is_complete() {
            return Err(PayoutError::MissingBankAccount);
        }

        Ok(vec![PayoutEvent::PayoutCreated(PayoutCreatedData {
            payout_id,
            vendor_id: draft.vendor_id,
            payment_id: draft.payment_id,
            schedule_id: draft.schedule_id,
            amount: draft.amount,
            bank_account: draft.bank_account,
            created_at: Utc::now(),
        })])
    }

    /// Submits a pending payout to the provider.
    pub fn start_processing(&self) -> Result<Vec<PayoutEvent>, PayoutError> {
        self.transition(PayoutStatus::Processing)?;
        Ok(vec![self.processing_event()])
    }

    /// Re-submits a failed payout.
    pub fn retry(&self) -> Result<Vec<PayoutEvent>, PayoutError> {
        if self.id.is_none() {
            return Err(PayoutError::NotCreated);
        }
        if !self.status.can_retry() {
            return Err(PayoutError::NotRetryable {
                status: self.status,
            });
        }
        Ok(vec![self.processing_event()])
    }

    /// Records the provider's transfer id while settlement is pending.
    pub fn record_transfer(&self, transfer_id: String) -> Result<Vec<PayoutEvent>, PayoutError> {
        if self.status != PayoutStatus::Processing {
            return Err(PayoutError::InvalidTransition {
                from: self.status,
                to: PayoutStatus::Processing,
            });
        }
        Ok(vec![PayoutEvent::PayoutTransferAccepted(
            PayoutTransferAcceptedData { transfer_id },
        )])
    }

    pub fn complete(&self, transfer_id: Option<String>) -> Result<Vec<PayoutEvent>, PayoutError> {
        self.transition(PayoutStatus::Completed)?;
        Ok(vec![PayoutEvent::PayoutCompleted(PayoutCompletedData {
            transfer_id,
            completed_at: Utc::now(),
        })])
    }

    pub fn fail(&self, reason: impl Into<String>) -> Result<Vec<PayoutEvent>, PayoutError> {
        self.transition(PayoutStatus::Failed)?;
        Ok(vec![PayoutEvent::PayoutFailed(PayoutFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })])
    }

    fn processing_event(&self) -> PayoutEvent {
        PayoutEvent::PayoutProcessing(PayoutProcessingData {
            attempt: self.attempts + 1,
            started_at: Utc::now(),
        })
    }

    fn transition(&self, next: PayoutStatus) -> Result<(), PayoutError> {
        if self.id.is_none() {
            return Err(PayoutError::NotCreated);
        }
        if !self.status.can_transition_to(next) {
            return Err(PayoutError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        Ok(())
    }
}
