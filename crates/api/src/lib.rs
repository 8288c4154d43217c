//! HTTP API server for the booking write path.
//!
//! Provides endpoints for payment creation and confirmation (gateway webhook
//! and manual status checks), vendor payouts and booking saga inspection,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use domain::{CommandContext, CommandPipeline, PaymentGateway, PaymentLedgerView, PayoutProvider};
use event_bus::EventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::BookingSagaCoordinator;
use store::TransactionalStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Header carrying the caller's correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Shared application state accessible from all handlers.
pub struct AppState<S: TransactionalStore> {
    pub pipeline: CommandPipeline<S>,
    pub coordinator: BookingSagaCoordinator<S>,
    pub ledger: PaymentLedgerView,
    pub command_timeout: Duration,
}

impl<S: TransactionalStore> AppState<S> {
    /// Builds the command context for one request.
    pub fn context(&self, headers: &HeaderMap) -> CommandContext {
        let ctx = CommandContext::new().with_timeout(self.command_timeout);
        match headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            Some(id) => ctx.with_correlation_id(id),
            None => ctx,
        }
    }
}

/// Creates the application state: event bus, ledger subscription and services.
pub async fn create_state<S: TransactionalStore>(
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    provider: Arc<dyn PayoutProvider>,
    config: &Config,
) -> Arc<AppState<S>> {
    let pipeline_config = config.pipeline();
    let bus = Arc::new(EventBus::new(pipeline_config.error_channel_capacity));

    let ledger = PaymentLedgerView::new();
    bus.subscribe_all(Arc::new(ledger.clone())).await;

    let pipeline = CommandPipeline::new(store, bus, &pipeline_config);
    let coordinator = BookingSagaCoordinator::new(pipeline.clone(), gateway, provider);

    Arc::new(AppState {
        pipeline,
        coordinator,
        ledger,
        command_timeout: config.command_timeout,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: TransactionalStore>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/payments", post(routes::payments::create::<S>))
        .route("/payments/webhook", post(routes::payments::webhook::<S>))
        .route("/payments/{order_code}", get(routes::payments::get::<S>))
        .route("/payments/{order_code}/check", post(routes::payments::check::<S>))
        .route("/payments/{order_code}/cancel", post(routes::payments::cancel::<S>))
        .route("/ledger/{order_code}", get(routes::payments::ledger_entry::<S>))
        .route("/payouts", post(routes::payouts::create::<S>))
        .route("/payouts/{id}", get(routes::payouts::get::<S>))
        .route("/payouts/{id}/process", post(routes::payouts::process::<S>))
        .route("/payouts/{id}/retry", post(routes::payouts::retry::<S>))
        .route("/sagas/{payment_id}", get(routes::sagas::get::<S>))
        .route("/sagas/{payment_id}/resume", post(routes::sagas::resume::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
