use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use common::attestation::AttestationToken;

use super::Workload;
use crate::broker::BrokerEndpoint;
use crate::gcp::{MetadataError, TeeError, GUEST_ATTRIBUTE_NAMESPACE, TOKEN_GUEST_ATTRIBUTE};

/// How often a fresh token is published; tokens live for an hour
pub const DEFAULT_REGISTRATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Issues attestation tokens for the running TEE
#[async_trait::async_trait]
pub trait AttestationProvider: Send + Sync {
    async fn fetch_token(
        &self,
        audience: &str,
        nonces: &[String],
    ) -> Result<AttestationToken, TeeError>;
}

/// Makes values readable by the broker's discovery
#[async_trait::async_trait]
pub trait GuestAttributePublisher: Send + Sync {
    async fn publish(&self, namespace: &str, key: &str, value: &str) -> Result<(), MetadataError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("failed to obtain attestation token: {0}")]
    Attestation(#[from] TeeError),
    #[error("failed to publish attestation token: {0}")]
    Publish(#[from] MetadataError),
}

/// Keeps a fresh attestation token published for the broker to discover
pub struct RegistrationDaemon {
    workload: Arc<Workload>,
    audience: BrokerEndpoint,
    attestation: Arc<dyn AttestationProvider>,
    publisher: Arc<dyn GuestAttributePublisher>,
    interval: Duration,
}

impl RegistrationDaemon {
    pub fn new(
        workload: Arc<Workload>,
        audience: BrokerEndpoint,
        attestation: Arc<dyn AttestationProvider>,
        publisher: Arc<dyn GuestAttributePublisher>,
    ) -> Self {
        Self {
            workload,
            audience,
            attestation,
            publisher,
            interval: DEFAULT_REGISTRATION_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Fetch a token binding the workload's key to the broker and publish it.
    pub async fn run_once(&self) -> Result<(), RegistrationError> {
        let nonces = self.workload.public_key().to_nonces();
        let token = self
            .attestation
            .fetch_token(self.audience.audience(), &nonces)
            .await?;

        self.publisher
            .publish(GUEST_ATTRIBUTE_NAMESPACE, TOKEN_GUEST_ATTRIBUTE, token.as_str())
            .await?;

        self.workload.mark_registered();
        Ok(())
    }

    /// Refresh the registration until `shutdown_rx` fires.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }

            tokio::select! {
                result = self.run_once() => match result {
                    Ok(()) => tracing::info!(broker = %self.audience, "refreshed workload registration"),
                    Err(e) => tracing::error!("workload registration failed: {}", e),
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::info!("registration daemon stopped");
    }
}
