use axum::routing::{get, post};
use axum::Router;

pub mod forward;
pub mod tokens;

pub use tokens::TokensRequest;

use crate::service_state::BrokerState;

/// Path of the forward endpoint, relative to the broker's URL
pub const FORWARD_PATH: &str = "forward";

pub fn router(state: BrokerState) -> Router<BrokerState> {
    Router::new()
        .route("/", get(tokens::handler))
        .route("/forward", post(forward::handler))
        .with_state(state)
}
