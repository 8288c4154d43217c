//! Read models fed by the event bus.
//!
//! Views here are plain subscribers: a command never waits on them and a
//! failing view never fails a command.

mod payment_ledger;
mod read_model;

pub use payment_ledger::{LedgerEntry, PaymentLedgerView};
pub use read_model::ReadModel;
