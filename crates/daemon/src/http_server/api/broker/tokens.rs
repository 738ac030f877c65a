use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder, Url};

use crate::broker::RequestToken;
use crate::http_server::api::client::ApiRequest;
use crate::service_state::BrokerState;

/// Ask the broker for a sample of live workload tokens
#[derive(Debug, Clone, Default)]
pub struct TokensRequest;

pub async fn handler(State(state): State<BrokerState>) -> Response {
    let tokens = state.broker().issue_tokens();
    tracing::debug!(count = tokens.len(), "issued request tokens");
    Json(tokens).into_response()
}

impl ApiRequest for TokensRequest {
    type Response = Vec<RequestToken>;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(base_url.clone())
    }
}
