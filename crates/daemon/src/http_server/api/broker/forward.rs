use axum::extract::{Json, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use common::protocol::ProtocolError;

use crate::broker::{ForwardError, WorkloadRequest};
use crate::service_state::BrokerState;

pub async fn handler(
    State(state): State<BrokerState>,
    Json(requests): Json<Vec<WorkloadRequest>>,
) -> Result<impl IntoResponse, ForwardApiError> {
    let reply = state.broker().forward(requests).await?;
    let frame = reply.to_frame()?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        frame,
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardApiError {
    #[error(transparent)]
    Forward(#[from] ForwardError),
    #[error("failed to frame reply: {0}")]
    Frame(#[from] ProtocolError),
}

impl IntoResponse for ForwardApiError {
    fn into_response(self) -> Response {
        match self {
            ForwardApiError::Forward(e @ ForwardError::NoAvailableInstance) => {
                tracing::warn!("forward failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
            }
            ForwardApiError::Forward(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            ForwardApiError::Frame(e) => {
                tracing::error!("failed to frame forward reply: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
                    .into_response()
            }
        }
    }
}
