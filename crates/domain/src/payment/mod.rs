//! Payment aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod status;

pub use aggregate::Payment;
pub use commands::CreatePayment;
pub use events::{
    PaymentCancelledData, PaymentCreatedData, PaymentEvent, PaymentExpiredData, PaymentPaidData,
};
pub use service::{PaymentConfirmation, PaymentService};
pub use status::PaymentStatus;

use common::AggregateId;
use thiserror::Error;

use crate::value_objects::Money;

/// Errors that can occur during payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Item total differs from the charged amount.
    #[error("total item amount ({total}) does not match payment amount ({amount})")]
    AmountMismatch { total: Money, amount: Money },

    /// Item total does not fit in a money amount.
    #[error("total item amount overflows")]
    TotalOverflow,

    /// Amount must be positive.
    #[error("Invalid amount: {0} (must be greater than 0)")]
    InvalidAmount(Money),

    /// Payment has no items.
    #[error("Payment has no items")]
    NoItems,

    /// Item quantity must be positive.
    #[error("Invalid quantity for item {name:?} (must be greater than 0)")]
    InvalidItemQuantity { name: String },

    /// Item price must be positive.
    #[error("Invalid price for item {name:?} (must be greater than 0)")]
    InvalidItemPrice { name: String },

    /// Start time must precede end time.
    #[error("Start time must be before end time")]
    InvalidTimeWindow,

    /// At least one service must be booked.
    #[error("At least one service is required")]
    NoServices,

    /// Service is inactive or belongs to another vendor.
    #[error("Service {0} is not offered by this vendor")]
    ServiceNotOffered(AggregateId),

    /// Pet belongs to another user.
    #[error("Pet {0} does not belong to the paying user")]
    PetNotOwned(AggregateId),

    /// Payment is already created.
    #[error("Payment already created")]
    AlreadyCreated,

    /// Status change on a payment that was never created.
    #[error("Payment has not been created")]
    NotCreated,

    /// Transition not in the status table.
    #[error("Invalid state transition: cannot move payment from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
}
