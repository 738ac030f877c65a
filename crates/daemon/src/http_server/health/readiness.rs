use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::time::timeout;

use super::data_source::{DataSourceError, StateDataSource};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

fn unavailable(message: &str) -> Response {
    let body = serde_json::json!({"status": "failure", "message": message});
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

#[tracing::instrument(skip_all)]
pub async fn handler(source: StateDataSource) -> Response {
    match timeout(HEALTH_CHECK_TIMEOUT, source.is_ready()).await {
        Ok(Ok(())) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response(),
        Ok(Err(DataSourceError::DependencyFailure(reason))) => {
            tracing::debug!(%reason, "readiness check failed");
            unavailable(&reason)
        }
        Ok(Err(DataSourceError::ShuttingDown)) => unavailable("shutting down"),
        Err(_) => unavailable("readiness check timed out"),
    }
}
