//! Booking saga for paid payments.
//!
//! When a payment becomes paid, the booking saga runs the steps that follow
//! it, each committed on its own:
//! 1. Create the schedule the payment booked
//! 2. Create the vendor payout for that schedule, or skip it when the vendor
//!    has no bank account
//!
//! Nothing is compensated. A failed step leaves earlier steps in place and
//! marks the saga failed; it is resumed by checking the payment again or by
//! an explicit resume.

pub mod aggregate;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod state;

pub use aggregate::BookingSaga;
pub use coordinator::{BookingSagaCoordinator, SagaReport};
pub use error::SagaError;
pub use events::SagaEvent;
pub use state::{SagaStatus, SagaStep};
