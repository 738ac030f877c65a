//! The client role
//!
//! Fetches tokens from the broker, verifies each one itself, and seals every
//! prompt separately to the keys of the workloads it picked. The broker only
//! ever sees ciphertext and tokens.

use std::time::Duration;

use rand::seq::SliceRandom;

use common::attestation::AttestationVerifier;
use common::crypto::HybridKeyPair;
use common::protocol::{EncryptedMessage, Message, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};

use crate::broker::{BrokerEndpoint, RequestToken, WorkloadRequest};
use crate::http_server::api::broker::TokensRequest;
use crate::http_server::api::client::{ApiClient, ApiError};

/// How many workloads a prompt is offered to
pub const DEFAULT_MAX_TOKENS_PER_PROMPT: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("none of the offered workloads passed verification")]
    NoUsableToken,
    #[error("broker request failed: {0}")]
    Broker(#[from] ApiError),
    #[error("failed to process reply: {0}")]
    Protocol(#[from] ProtocolError),
}

/// HTTP access to a broker's two endpoints
#[derive(Debug, Clone)]
pub struct BrokerClient {
    api: ApiClient,
}

impl BrokerClient {
    pub fn new(endpoint: &BrokerEndpoint) -> Result<Self, ApiError> {
        Ok(Self {
            api: ApiClient::new(endpoint.url())?,
        })
    }

    pub async fn tokens(&self) -> Result<Vec<RequestToken>, ApiError> {
        self.api.call(TokensRequest).await
    }

    pub async fn forward(
        &self,
        requests: &[WorkloadRequest],
    ) -> Result<EncryptedMessage, ApiError> {
        self.api.forward(requests).await
    }

    /// Poll until the broker offers at least one token.
    pub async fn wait_for_tokens(&self, poll_interval: Duration) -> Result<Vec<RequestToken>, ApiError> {
        loop {
            let tokens = self.tokens().await?;
            if !tokens.is_empty() {
                return Ok(tokens);
            }
            tracing::info!(
                "broker has no workload instances available, retrying in {:?}",
                poll_interval
            );
            tokio::time::sleep(poll_interval).await;
        }
    }
}

pub struct Client {
    broker: BrokerClient,
    endpoint: BrokerEndpoint,
    verifier: AttestationVerifier,
    debug: bool,
    max_tokens: usize,
}

impl Client {
    /// `debug` accepts workloads whose VM allows debugging.
    pub fn new(
        endpoint: BrokerEndpoint,
        verifier: AttestationVerifier,
        debug: bool,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            broker: BrokerClient::new(&endpoint)?,
            endpoint,
            verifier,
            debug,
            max_tokens: DEFAULT_MAX_TOKENS_PER_PROMPT,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn broker(&self) -> &BrokerClient {
        &self.broker
    }

    /// Send `prompt` to one of the workloads behind `tokens` and return its
    /// answer.
    pub async fn prompt(&self, tokens: &[RequestToken], prompt: &str) -> Result<String, ClientError> {
        // A fresh key per prompt keeps replies unlinkable.
        let key_pair = HybridKeyPair::generate();

        let mut candidates = tokens.to_vec();
        candidates.shuffle(&mut rand::rng());
        candidates.truncate(self.max_tokens);

        let mut requests = Vec::with_capacity(candidates.len());
        for token in candidates {
            let payload = match self
                .verifier
                .verify(token.attestation_token(), self.endpoint.audience(), !self.debug)
                .await
            {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("skipping workload token: {}", e);
                    continue;
                }
            };
            let workload_key = match payload.request_encryption_key() {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!("skipping workload token: {}", e);
                    continue;
                }
            };

            let message = Message::new(prompt)
                .with_sender_key(key_pair.public_key().clone())
                .encrypt(&workload_key)?;
            // Workloads refuse anything larger, which the broker would only
            // see as every candidate failing.
            if message.len() > DEFAULT_MAX_MESSAGE_SIZE {
                return Err(ProtocolError::FrameTooLarge {
                    length: message.len(),
                    max: DEFAULT_MAX_MESSAGE_SIZE,
                }
                .into());
            }
            requests.push(WorkloadRequest { token, message });
        }

        if requests.is_empty() {
            return Err(ClientError::NoUsableToken);
        }
        tracing::debug!(candidates = requests.len(), "forwarding prompt");

        let reply = self.broker.forward(&requests).await?;
        let reply = reply.decrypt(key_pair.private_key())?;
        Ok(reply.into_body())
    }
}
