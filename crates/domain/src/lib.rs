//! Domain layer for the booking write path.
//!
//! This crate provides:
//! - [`Aggregate`] and [`AggregateRoot`] for aggregates that buffer their events
//! - [`UnitOfWork`] binding several repositories into one store transaction
//! - [`CommandPipeline`] committing a unit of work and publishing its events
//! - The booking aggregates (users, pets, vendors, offerings, payments,
//!   schedules, payouts) and their command services
//! - Ports to the payment gateway and payout provider, with in-memory fakes

pub mod aggregate;
pub mod command;
pub mod context;
pub mod error;
pub mod gateway;
pub mod offering;
pub mod payment;
pub mod payout;
pub mod pet;
pub mod projections;
pub mod repository;
pub mod schedule;
pub mod unit_of_work;
pub mod user;
pub mod value_objects;
pub mod vendor;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent};
pub use command::{CommandOutcome, CommandPipeline, PipelineConfig, PublishMode};
pub use context::CommandContext;
pub use error::{DomainError, ErrorKind};
pub use gateway::{
    GatewayError, GatewayStatus, InMemoryPaymentGateway, InMemoryPayoutProvider, PaymentGateway,
    PaymentLink, PaymentLinkInfo, PaymentLinkRequest, PayoutProvider, TransferReceipt,
    TransferRequest, TransferStatus,
};
pub use offering::{CreateOffering, Offering, OfferingError, OfferingEvent, OfferingService};
pub use payment::{
    CreatePayment, Payment, PaymentConfirmation, PaymentError, PaymentEvent, PaymentService,
    PaymentStatus,
};
pub use payout::{Payout, PayoutError, PayoutEvent, PayoutService, PayoutStatus, RequestPayout};
pub use pet::{Pet, PetDetails, PetError, PetEvent, PetService};
pub use projections::{LedgerEntry, PaymentLedgerView, ReadModel};
pub use repository::Repository;
pub use schedule::{
    CreateSchedule, Schedule, ScheduleError, ScheduleEvent, ScheduleService, ScheduleStatus,
};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory, UnitOfWorkStatus};
pub use user::{RegisterUser, User, UserError, UserEvent, UserRole, UserService};
pub use value_objects::{BankAccount, Money, OrderCode, PaymentItem};
pub use vendor::{RegisterVendor, Vendor, VendorError, VendorEvent, VendorService};
