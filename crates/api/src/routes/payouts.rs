//! Vendor payout endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::AggregateId;
use domain::{Aggregate, Money, Payout, RequestPayout};
use serde::{Deserialize, Serialize};
use store::TransactionalStore;

use super::parse_aggregate_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct RequestPayoutRequest {
    pub vendor_id: AggregateId,
    pub amount: i64,
    #[serde(default)]
    pub payment_id: Option<AggregateId>,
    #[serde(default)]
    pub schedule_id: Option<AggregateId>,
}

#[derive(Serialize)]
pub struct PayoutResponse {
    pub id: String,
    pub vendor_id: Option<String>,
    pub payment_id: Option<String>,
    pub schedule_id: Option<String>,
    pub amount: i64,
    pub status: String,
    pub transfer_id: Option<String>,
    pub failure_reason: Option<String>,
    pub attempts: u32,
}

impl From<&Payout> for PayoutResponse {
    fn from(payout: &Payout) -> Self {
        Self {
            id: payout.id().map(|id| id.to_string()).unwrap_or_default(),
            vendor_id: payout.vendor_id().map(|id| id.to_string()),
            payment_id: payout.payment_id().map(|id| id.to_string()),
            schedule_id: payout.schedule_id().map(|id| id.to_string()),
            amount: payout.amount().amount(),
            status: payout.status().to_string(),
            transfer_id: payout.transfer_id().map(String::from),
            failure_reason: payout.failure_reason().map(String::from),
            attempts: payout.attempts(),
        }
    }
}

/// POST /payouts: request a payout to a vendor's bank account.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<RequestPayoutRequest>,
) -> Result<(StatusCode, Json<PayoutResponse>), ApiError> {
    let ctx = state.context(&headers);
    let cmd = RequestPayout {
        vendor_id: req.vendor_id,
        amount: Money::new(req.amount),
        payment_id: req.payment_id,
        schedule_id: req.schedule_id,
    };
    let payout = state.coordinator.payouts().request_payout(&ctx, cmd).await?;
    Ok((StatusCode::CREATED, Json(PayoutResponse::from(&payout))))
}

/// GET /payouts/{id}
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let payout_id = parse_aggregate_id(&id)?;
    let ctx = state.context(&headers);
    let payout = state.coordinator.payouts().get_payout(&ctx, payout_id).await?;
    Ok(Json(PayoutResponse::from(&payout)))
}

/// POST /payouts/{id}/process: submit a pending payout to the provider.
#[tracing::instrument(skip(state, headers))]
pub async fn process<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let payout_id = parse_aggregate_id(&id)?;
    let ctx = state.context(&headers);
    let payout = state
        .coordinator
        .payouts()
        .process_payout(&ctx, payout_id)
        .await?;
    Ok(Json(PayoutResponse::from(&payout)))
}

/// POST /payouts/{id}/retry: re-submit a failed payout.
#[tracing::instrument(skip(state, headers))]
pub async fn retry<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let payout_id = parse_aggregate_id(&id)?;
    let ctx = state.context(&headers);
    let payout = state
        .coordinator
        .payouts()
        .retry_payout(&ctx, payout_id)
        .await?;
    Ok(Json(PayoutResponse::from(&payout)))
}
