//! Payout aggregate and related types.

mod aggregate;
mod events;
mod service;
mod status;

pub use aggregate::{Payout, PayoutDraft};
pub use events::{
    PayoutCompletedData, PayoutCreatedData, PayoutEvent, PayoutFailedData, PayoutProcessingData,
    PayoutTransferAcceptedData,
};
pub use service::{PayoutService, RequestPayout};
pub use status::PayoutStatus;

use thiserror::Error;

use crate::value_objects::Money;

/// Errors that can occur during payout operations.
#[derive(Debug, Error)]
pub enum PayoutError {
    /// Amount must be positive.
    #[error("Invalid payout amount: {0} (must be greater than 0)")]
    InvalidAmount(Money),

    /// Vendor has no usable bank account.
    #[error("Vendor has no bank account configured")]
    MissingBankAccount,

    /// Payout is already created.
    #[error("Payout already created")]
    AlreadyCreated,

    /// Status change on a payout that was never created.
    #[error("Payout has not been created")]
    NotCreated,

    /// Transition not in the status table.
    #[error("Invalid state transition: cannot move payout from {from} to {to}")]
    InvalidTransition {
        from: PayoutStatus,
        to: PayoutStatus,
    },

    /// Only failed payouts can be retried.
    #[error("Payout is {status}, only failed payouts can be retried")]
    NotRetryable { status: PayoutStatus },
}
