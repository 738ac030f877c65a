use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use common::protocol::{EncryptedMessage, ProtocolError};

use crate::service_state::WorkloadState;
use crate::workload::WorkloadError;

pub async fn handler(
    State(state): State<WorkloadState>,
    body: Bytes,
) -> Result<impl IntoResponse, InferenceApiError> {
    let request = EncryptedMessage::from_frame(&body, state.max_message_size())
        .map_err(InferenceApiError::BadFrame)?;
    let reply = state.workload().handle(request).await?;
    let frame = reply.to_frame().map_err(InferenceApiError::Reply)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        frame,
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceApiError {
    #[error("malformed request frame: {0}")]
    BadFrame(ProtocolError),
    #[error(transparent)]
    Workload(#[from] WorkloadError),
    #[error("failed to frame reply: {0}")]
    Reply(ProtocolError),
}

impl IntoResponse for InferenceApiError {
    fn into_response(self) -> Response {
        tracing::warn!("inference request failed: {}", self);
        match self {
            InferenceApiError::BadFrame(_)
            | InferenceApiError::Workload(WorkloadError::Protocol(_))
            | InferenceApiError::Workload(WorkloadError::MissingSenderKey) => {
                (StatusCode::BAD_REQUEST, "Invalid request").into_response()
            }
            InferenceApiError::Workload(WorkloadError::Inference(_)) | InferenceApiError::Reply(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
