//! Schedule aggregate and related types.

mod aggregate;
mod events;
mod service;
mod status;

pub use aggregate::{Schedule, ScheduleDraft};
pub use events::{
    AssignedPet, BookedService, BookedUser, BookedVendor, ScheduleCancelledData,
    ScheduleCompletedData, ScheduleConfirmedData, ScheduleCreatedData, ScheduleEvent,
};
pub use service::{CreateSchedule, ScheduleService};
pub use status::ScheduleStatus;

use common::AggregateId;
use thiserror::Error;

use crate::payment::PaymentStatus;

/// Errors that can occur during schedule operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// At least one service must be booked.
    #[error("At least one service is required")]
    NoServices,

    /// Start time must precede end time.
    #[error("Start time must be before end time")]
    InvalidTimeWindow,

    /// Sum of the booked service prices does not fit in a money amount.
    #[error("total service price overflows")]
    TotalOverflow,

    /// Pet belongs to another user.
    #[error("Pet {0} does not belong to the booking user")]
    PetNotOwned(AggregateId),

    /// Service is inactive or belongs to another vendor.
    #[error("Service {0} is not offered by this vendor")]
    ServiceNotOffered(AggregateId),

    /// Schedules are only booked through paid payments.
    #[error("Payment is {status}, only paid payments can be scheduled")]
    PaymentNotPaid { status: PaymentStatus },

    /// Payment lacks the booking snapshot.
    #[error("Payment {0} has no booking details")]
    IncompleteBooking(AggregateId),

    /// Schedule is already created.
    #[error("Schedule already created")]
    AlreadyCreated,

    /// Status change on a schedule that was never created.
    #[error("Schedule has not been created")]
    NotCreated,

    /// Transition not in the status table.
    #[error("Invalid state transition: cannot move schedule from {from} to {to}")]
    InvalidTransition {
        from: ScheduleStatus,
        to: ScheduleStatus,
    },
}
