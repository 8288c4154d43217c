//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use axum::Router;
use domain::{InMemoryPaymentGateway, InMemoryPayoutProvider};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, TransactionalStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Builds the router over `store` and starts draining event handler failures.
async fn build_app<S: TransactionalStore>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Router {
    // No gateway client is configured here; payments run against the
    // in-memory gateway and payout provider.
    let state = api::create_state(
        store,
        Arc::new(InMemoryPaymentGateway::new()),
        Arc::new(InMemoryPayoutProvider::new()),
        config,
    )
    .await;

    if let Some(mut failures) = state.pipeline.bus().take_error_receiver().await {
        tokio::spawn(async move {
            while let Some(failure) = failures.recv().await {
                tracing::warn!(
                    handler = failure.handler,
                    event_type = %failure.event_type,
                    event_id = %failure.event_id,
                    error = %failure.error,
                    "event handler failed"
                );
            }
        });
    }

    api::create_app(state, metrics_handle)
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the store and build the application
    let app = match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            build_app(store, &config, metrics_handle).await
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            build_app(InMemoryStore::new(), &config, metrics_handle).await
        }
    };

    // 4. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
