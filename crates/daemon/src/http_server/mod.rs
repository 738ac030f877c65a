use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::sync::watch;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

use common::protocol::FRAME_HEADER_SIZE;

pub mod api;
mod config;
mod handlers;
pub mod health;

pub use config::Config;

use crate::service_state::{BrokerState, WorkloadState};

const STATUS_PREFIX: &str = "/_status";

/// Largest forward request body, room for a full batch of candidates
pub const MAX_FORWARD_BODY_SIZE: usize = 256 * 1024;

fn trace_layer(config: &Config) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(config.log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros))
}

/// Routes of the broker: token issuance, forwarding, and /_status.
pub fn broker_router(config: &Config, state: BrokerState) -> Router {
    Router::new()
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .merge(api::broker::router(state.clone()))
        .fallback(handlers::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_FORWARD_BODY_SIZE))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests))
        .with_state(state)
        .layer(trace_layer(config))
}

/// Routes of the workload server: inference at / and /_status.
pub fn workload_router(config: &Config, state: WorkloadState) -> Router {
    let body_limit = FRAME_HEADER_SIZE + state.max_message_size();
    Router::new()
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .merge(api::workload::router(state.clone()))
        .fallback(handlers::not_found_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests))
        .with_state(state)
        .layer(trace_layer(config))
}

async fn serve(
    config: Config,
    router: Router,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listen_addr = config.listen_addr;
    tracing::info!(addr = ?listen_addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

/// Run the broker's HTTP server until shutdown.
pub async fn run_broker(
    config: Config,
    state: BrokerState,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let router = broker_router(&config, state);
    serve(config, router, shutdown_rx).await
}

/// Run the workload's HTTP server until shutdown.
pub async fn run_workload(
    config: Config,
    state: WorkloadState,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let router = workload_router(&config, state);
    serve(config, router, shutdown_rx).await
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
