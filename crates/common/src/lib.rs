//! Shared identifier types for the booking write-path.

mod types;
mod version;

pub use types::{AggregateId, ParseIdError};
pub use version::Version;
