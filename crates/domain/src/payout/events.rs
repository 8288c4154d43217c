//! Payout domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::value_objects::{BankAccount, Money};

/// Events that can occur on a payout aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PayoutEvent {
    /// Payout was created.
    PayoutCreated(PayoutCreatedData),

    /// Transfer was submitted to the provider.
    PayoutProcessing(PayoutProcessingData),

    /// Provider accepted the transfer; settlement pending.
    PayoutTransferAccepted(PayoutTransferAcceptedData),

    /// Money transferred.
    PayoutCompleted(PayoutCompletedData),

    /// Transfer failed.
    PayoutFailed(PayoutFailedData),
}

impl DomainEvent for PayoutEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PayoutEvent::PayoutCreated(_) => "PayoutCreated",
            PayoutEvent::PayoutProcessing(_) => "PayoutProcessing",
            PayoutEvent::PayoutTransferAccepted(_) => "PayoutTransferAccepted",
            PayoutEvent::PayoutCompleted(_) => "PayoutCompleted",
            PayoutEvent::PayoutFailed(_) => "PayoutFailed",
        }
    }
}

/// Data for PayoutCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutCreatedData {
    pub payout_id: AggregateId,
    pub vendor_id: AggregateId,
    pub payment_id: Option<AggregateId>,
    pub schedule_id: Option<AggregateId>,
    pub amount: Money,
    pub bank_account: BankAccount,
    pub created_at: DateTime<Utc>,
}

/// Data for PayoutProcessing event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutProcessingData {
    /// 1 for the first submission, incremented by every retry.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutTransferAcceptedData {
    pub transfer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutCompletedData {
    pub transfer_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}
