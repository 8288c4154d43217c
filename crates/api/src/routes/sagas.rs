//! Booking saga inspection and resume endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use domain::Aggregate;
use saga::BookingSaga;
use serde::Serialize;
use store::TransactionalStore;

use super::parse_aggregate_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct SagaResponse {
    pub saga_id: String,
    pub payment_id: Option<String>,
    pub step: String,
    pub status: String,
    pub schedule_id: Option<String>,
    pub payout_id: Option<String>,
    pub payout_skipped: bool,
    pub failed_step: Option<String>,
    pub last_error: Option<String>,
    pub attempts: u32,
}

impl From<&BookingSaga> for SagaResponse {
    fn from(saga: &BookingSaga) -> Self {
        Self {
            saga_id: saga.id().map(|id| id.to_string()).unwrap_or_default(),
            payment_id: saga.payment_id().map(|id| id.to_string()),
            step: saga.step().to_string(),
            status: saga.status().to_string(),
            schedule_id: saga.schedule_id().map(|id| id.to_string()),
            payout_id: saga.payout_id().map(|id| id.to_string()),
            payout_skipped: saga.payout_skipped(),
            failed_step: saga.failed_step().map(|s| s.to_string()),
            last_error: saga.last_error().map(String::from),
            attempts: saga.attempts(),
        }
    }
}

/// GET /sagas/{payment_id}: booking saga of a payment.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let id = parse_aggregate_id(&payment_id)?;
    let ctx = state.context(&headers);
    let saga = state
        .coordinator
        .get_saga(&ctx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No saga for payment {payment_id}")))?;
    Ok(Json(SagaResponse::from(&saga)))
}

/// POST /sagas/{payment_id}/resume: drive a failed booking again.
#[tracing::instrument(skip(state, headers))]
pub async fn resume<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let id = parse_aggregate_id(&payment_id)?;
    let ctx = state.context(&headers);
    let saga = state.coordinator.resume(&ctx, id).await?;
    Ok(Json(SagaResponse::from(&saga)))
}
