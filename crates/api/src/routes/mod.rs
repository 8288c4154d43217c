//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod payments;
pub mod payouts;
pub mod sagas;

use common::AggregateId;

use crate::error::ApiError;

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
