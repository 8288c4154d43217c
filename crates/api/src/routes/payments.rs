//! Payment creation, confirmation and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, CreatePayment, LedgerEntry, Money, OrderCode, Payment, PaymentItem};
use saga::SagaReport;
use serde::{Deserialize, Serialize};
use store::TransactionalStore;

use super::sagas::SagaResponse;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: AggregateId,
    pub vendor_id: AggregateId,
    pub pet_id: AggregateId,
    pub service_ids: Vec<AggregateId>,
    pub amount: i64,
    pub items: Vec<PaymentItemRequest>,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct PaymentItemRequest {
    pub name: String,
    pub price: i64,
    pub quantity: u32,
}

/// Gateway webhook body.
#[derive(Deserialize)]
pub struct WebhookRequest {
    pub order_code: i64,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_code: Option<i64>,
    pub status: String,
    pub amount: i64,
    pub description: String,
    pub checkout_url: String,
    pub qr_code: String,
    pub expired_at: Option<String>,
    pub paid_at: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id().map(|id| id.to_string()).unwrap_or_default(),
            order_code: payment.order_code().map(|c| c.as_i64()),
            status: payment.status().to_string(),
            amount: payment.amount().amount(),
            description: payment.description().to_string(),
            checkout_url: payment.checkout_url().to_string(),
            qr_code: payment.qr_code().to_string(),
            expired_at: payment.expired_at().map(|t| t.to_rfc3339()),
            paid_at: payment.paid_at().map(|t| t.to_rfc3339()),
            cancellation_reason: payment.cancellation_reason().map(String::from),
        }
    }
}

#[derive(Serialize)]
pub struct ConfirmResponse {
    pub payment: PaymentResponse,
    /// Status the payment moved to during this check, if any.
    pub transitioned: Option<String>,
    pub saga: Option<SagaResponse>,
}

impl From<&SagaReport> for ConfirmResponse {
    fn from(report: &SagaReport) -> Self {
        Self {
            payment: PaymentResponse::from(&report.payment),
            transitioned: report.transitioned.map(|s| s.to_string()),
            saga: report.saga.as_ref().map(SagaResponse::from),
        }
    }
}

#[derive(Serialize)]
pub struct LedgerEntryResponse {
    pub payment_id: String,
    pub order_code: i64,
    pub status: String,
    pub amount: i64,
    pub reason: Option<String>,
    pub updated_at: String,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            payment_id: entry.payment_id.to_string(),
            order_code: entry.order_code.as_i64(),
            status: entry.status.to_string(),
            amount: entry.amount.amount(),
            reason: entry.reason,
            updated_at: entry.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /payments: create a payment and its checkout link.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let ctx = state.context(&headers);
    let cmd = CreatePayment {
        user_id: req.user_id,
        vendor_id: req.vendor_id,
        pet_id: req.pet_id,
        service_ids: req.service_ids,
        amount: Money::new(req.amount),
        items: req
            .items
            .into_iter()
            .map(|i| PaymentItem::new(i.name, Money::new(i.price), i.quantity))
            .collect(),
        description: req.description,
        start_time: req.start_time,
        end_time: req.end_time,
    };

    let payment = state.coordinator.payments().create_payment(&ctx, cmd).await?;
    Ok((StatusCode::CREATED, Json(PaymentResponse::from(&payment))))
}

/// GET /payments/{order_code}: load a payment by its gateway order code.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(order_code): Path<i64>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let ctx = state.context(&headers);
    let payment = state
        .coordinator
        .payments()
        .get_payment_by_order_code(&ctx, OrderCode::new(order_code))
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /payments/webhook: gateway notification for an order code.
///
/// The body is only a hint; the payment status is always re-read from the
/// gateway.
#[tracing::instrument(skip(state, headers, req))]
pub async fn webhook<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<WebhookRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    confirm(&state, &headers, req.order_code).await
}

/// POST /payments/{order_code}/check: manual status check.
#[tracing::instrument(skip(state, headers))]
pub async fn check<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(order_code): Path<i64>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    confirm(&state, &headers, order_code).await
}

async fn confirm<S: TransactionalStore>(
    state: &AppState<S>,
    headers: &HeaderMap,
    order_code: i64,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let ctx = state.context(headers);
    tracing::debug!(order_code, correlation_id = %ctx.correlation_id(), "checking payment status");
    let report = state
        .coordinator
        .confirm_payment(&ctx, OrderCode::new(order_code))
        .await?;
    Ok(Json(ConfirmResponse::from(&report)))
}

/// POST /payments/{order_code}/cancel: cancel a pending payment.
#[tracing::instrument(skip(state, headers, req))]
pub async fn cancel<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(order_code): Path<i64>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let ctx = state.context(&headers);
    let payment = state
        .coordinator
        .payments()
        .cancel_payment(&ctx, OrderCode::new(order_code), req.reason)
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// GET /ledger/{order_code}: payment ledger read model entry.
///
/// The ledger is updated after commit, so it can briefly trail the payment.
#[tracing::instrument(skip(state))]
pub async fn ledger_entry<S: TransactionalStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_code): Path<i64>,
) -> Result<Json<LedgerEntryResponse>, ApiError> {
    let entry = state
        .ledger
        .get(OrderCode::new(order_code))
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No ledger entry for order {order_code}")))?;
    Ok(Json(LedgerEntryResponse::from(entry)))
}
