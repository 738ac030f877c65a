//! The workload server role
//!
//! Runs inside the TEE. Holds the process-lifetime key pair whose public half
//! is embedded in the attestation token, opens inference requests relayed by
//! the broker, and seals each reply to the key the client attached.

mod registration;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::crypto::{HybridKeyPair, PublicKey};
use common::protocol::{EncryptedMessage, Message, ProtocolError};

pub use registration::{
    AttestationProvider, GuestAttributePublisher, RegistrationDaemon, RegistrationError,
    DEFAULT_REGISTRATION_INTERVAL,
};

use crate::http_server::health::{DataSource, DataSourceError};

#[derive(Debug, thiserror::Error)]
#[error("inference failed: {0}")]
pub struct InferenceError(pub String);

/// Turns a prompt into a completion
#[async_trait::async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn infer(&self, prompt: &str) -> Result<String, InferenceError>;
}

/// Canned responder standing in for a model server
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoEngine;

#[async_trait::async_trait]
impl InferenceEngine for EchoEngine {
    async fn infer(&self, prompt: &str) -> Result<String, InferenceError> {
        Ok(format!("> {}\nThat's a good question.", prompt))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("request carries no sender key to encrypt the reply to")]
    MissingSenderKey,
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

pub struct Workload {
    key_pair: HybridKeyPair,
    engine: Arc<dyn InferenceEngine>,
    registered: AtomicBool,
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload")
            .field("public_key", self.key_pair.public_key())
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl Workload {
    pub fn new(key_pair: HybridKeyPair, engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            key_pair,
            engine,
            registered: AtomicBool::new(false),
        }
    }

    /// Key clients encrypt requests to
    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Record that the broker can discover this instance.
    pub fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }

    /// Open a request, run inference, and seal the reply to the sender.
    pub async fn handle(&self, request: EncryptedMessage) -> Result<EncryptedMessage, WorkloadError> {
        let message = request.decrypt(self.key_pair.private_key())?;
        let sender_key = message
            .sender_key()
            .ok_or(WorkloadError::MissingSenderKey)?;

        let completion = self.engine.infer(message.body()).await?;
        let reply = Message::new(completion).encrypt(sender_key)?;

        tracing::debug!(
            request_size = request.len(),
            reply_size = reply.len(),
            "handled inference request"
        );
        Ok(reply)
    }
}

#[async_trait::async_trait]
impl DataSource for Workload {
    /// Ready once a registration has been published.
    async fn is_ready(&self) -> Result<(), DataSourceError> {
        if !self.is_registered() {
            return Err(DataSourceError::DependencyFailure(
                "attestation token not yet published".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn workload() -> Workload {
        Workload::new(HybridKeyPair::generate(), Arc::new(EchoEngine))
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let workload = workload();
        let client = HybridKeyPair::generate();

        let request = Message::new("What is a TEE?")
            .with_sender_key(client.public_key().clone())
            .encrypt(workload.public_key())
            .unwrap();

        let reply = workload.handle(request).await.unwrap();
        let reply = reply.decrypt(client.private_key()).unwrap();
        assert_eq!(reply.body(), "> What is a TEE?\nThat's a good question.");
        assert!(reply.sender_key().is_none());
    }

    #[tokio::test]
    async fn test_handle_requires_sender_key() {
        let workload = workload();
        let request = Message::new("anonymous")
            .encrypt(workload.public_key())
            .unwrap();

        let err = workload.handle(request).await.unwrap_err();
        assert!(matches!(err, WorkloadError::MissingSenderKey));
    }

    #[tokio::test]
    async fn test_handle_rejects_foreign_ciphertext() {
        let workload = workload();
        let other = HybridKeyPair::generate();
        let request = Message::new("for someone else")
            .with_sender_key(other.public_key().clone())
            .encrypt(other.public_key())
            .unwrap();

        let err = workload.handle(request).await.unwrap_err();
        assert!(matches!(err, WorkloadError::Protocol(ProtocolError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_readiness_follows_registration() {
        let workload = workload();
        assert!(workload.is_ready().await.is_err());
        workload.mark_registered();
        assert!(workload.is_ready().await.is_ok());
    }
}
