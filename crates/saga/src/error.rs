//! Saga error types.

use domain::{DomainError, PaymentStatus};
use thiserror::Error;

use crate::state::{SagaStatus, SagaStep};

/// Errors raised by booking saga decisions.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga record already exists.
    #[error("Saga has already been started")]
    AlreadyStarted,

    /// The saga record was never created.
    #[error("Saga has not been started")]
    NotStarted,

    /// Steps are only recorded on a running saga.
    #[error("Saga is {status}, expected Running")]
    NotRunning { status: SagaStatus },

    /// A step outcome arrived for a step the saga is not waiting on.
    #[error("Saga is at step {actual}, expected {expected}")]
    OutOfOrder { expected: SagaStep, actual: SagaStep },

    /// Only failed sagas can be resumed.
    #[error("Saga is {status}, only failed sagas can be resumed")]
    NotResumable { status: SagaStatus },

    /// Bookings are only driven for paid payments.
    #[error("Payment is {status}, only paid payments start a booking")]
    PaymentNotPaid { status: PaymentStatus },
}

impl From<SagaError> for DomainError {
    fn from(err: SagaError) -> Self {
        DomainError::Validation(err.to_string())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
