//! Domain error types.

use event_bus::EnvelopeError;
use store::StoreError;
use thiserror::Error;

use crate::aggregate::Aggregate;
use crate::gateway::GatewayError;
use crate::offering::OfferingError;
use crate::payment::PaymentError;
use crate::payout::PayoutError;
use crate::pet::PetError;
use crate::schedule::ScheduleError;
use crate::unit_of_work::UnitOfWorkStatus;
use crate::user::UserError;
use crate::vendor::VendorError;

/// Error classes surfaced to callers of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input or an illegal state transition.
    Validation,
    /// The addressed aggregate does not exist.
    NotFound,
    /// A concurrent writer won, or a unique key is already taken.
    Conflict,
    /// Store, gateway or infrastructure failure.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Command input rejected before touching any aggregate.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Pet(#[from] PetError),

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error(transparent)]
    Offering(#[from] OfferingError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Payout(#[from] PayoutError),

    /// Aggregate not found.
    #[error("{aggregate_type} not found: {key}")]
    NotFound {
        aggregate_type: &'static str,
        key: String,
    },

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A remote collaborator failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The command's deadline passed while waiting on the named operation.
    #[error("Deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),

    /// The command was cancelled by its caller.
    #[error("Command cancelled")]
    Cancelled,

    /// The unit of work was used outside its open window.
    #[error("Unit of work is not open (status: {status})")]
    UnitOfWorkNotOpen { status: UnitOfWorkStatus },
}

impl DomainError {
    /// Creates a not-found error for an aggregate type.
    pub fn not_found<A: Aggregate>(key: impl std::fmt::Display) -> Self {
        DomainError::NotFound {
            aggregate_type: A::aggregate_type(),
            key: key.to_string(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_)
            | DomainError::User(_)
            | DomainError::Pet(_)
            | DomainError::Vendor(_)
            | DomainError::Offering(_)
            | DomainError::Payment(_)
            | DomainError::Schedule(_)
            | DomainError::Payout(_) => ErrorKind::Validation,
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::Store(e) if e.is_conflict() => ErrorKind::Conflict,
            DomainError::Gateway(GatewayError::UnknownOrder(_)) => ErrorKind::NotFound,
            DomainError::Gateway(GatewayError::Rejected(_)) => ErrorKind::Validation,
            DomainError::Store(_)
            | DomainError::Gateway(_)
            | DomainError::Serialization(_)
            | DomainError::Envelope(_)
            | DomainError::DeadlineExceeded(_)
            | DomainError::Cancelled
            | DomainError::UnitOfWorkNotOpen { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if the error is a concurrency or unique-key conflict.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::{Money, OrderCode};
    use common::{AggregateId, Version};

    #[test]
    fn aggregate_errors_are_validation() {
        let err: DomainError = PaymentError::AmountMismatch {
            total: Money::new(80_000),
            amount: Money::new(100_000),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            err.to_string(),
            "total item amount (80000) does not match payment amount (100000)"
        );
    }

    #[test]
    fn store_conflicts_are_conflicts() {
        let err: DomainError = StoreError::ConcurrencyConflict {
            aggregate_type: "Payment".into(),
            aggregate_id: AggregateId::new(),
            expected: Version::first(),
            actual: Version::new(2),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: DomainError = StoreError::DuplicateKey {
            aggregate_type: "User".into(),
            key: "email".into(),
            value: "a@b.io".into(),
        }
        .into();
        assert!(err.is_conflict());
    }

    #[test]
    fn infrastructure_failures_are_internal() {
        let err: DomainError = StoreError::CommitFailed("disk full".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(DomainError::Cancelled.kind(), ErrorKind::Internal);
        assert_eq!(
            DomainError::DeadlineExceeded("commit").kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn gateway_errors_are_classified() {
        let err: DomainError = GatewayError::UnknownOrder(OrderCode::new(1)).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err: DomainError = GatewayError::Unavailable("timeout".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn not_found_names_aggregate() {
        let err = DomainError::not_found::<crate::Payment>(OrderCode::new(7));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Payment not found: 7");
    }
}
