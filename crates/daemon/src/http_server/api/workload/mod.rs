use axum::routing::post;
use axum::Router;

pub mod inference;

use crate::service_state::WorkloadState;

/// Only POST is routed, other methods on `/` answer 405.
pub fn router(state: WorkloadState) -> Router<WorkloadState> {
    Router::new()
        .route("/", post(inference::handler))
        .with_state(state)
}
