//! Request routing without access to payloads
//!
//! The broker keeps a snapshot of live workload registrations, hands clients
//! a random sample of their attestation tokens, and relays sealed payloads to
//! whichever candidate a client picked that still checks out. It never holds
//! a key that opens a payload.

mod discovery;
mod endpoint;
mod registration;
mod transport;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::seq::SliceRandom;

use common::attestation::{AttestationVerifier, MissingClaimError, VerificationError};
use common::protocol::EncryptedMessage;

pub use discovery::{
    DirectoryError, DiscoveryDaemon, InstanceDirectory, InstanceRef, DEFAULT_DISCOVERY_INTERVAL,
};
pub use endpoint::BrokerEndpoint;
pub use registration::{Registration, RequestToken, WorkloadRequest};
pub use transport::{
    AddressResolver, HttpWorkloadTransport, TransportError, WorkloadTransport,
    DEFAULT_MAX_REPLY_SIZE, DEFAULT_WORKLOAD_PORT,
};

use crate::http_server::health::{DataSource, DataSourceError};

/// Tunables of the routing engine
#[derive(Debug, Clone)]
pub struct BrokerPolicy {
    /// Upper bound on tokens handed out per request, and on candidates
    /// accepted per forward
    pub max_request_tokens: usize,
    /// Refuse workloads whose VM allows debugging. Clients apply their own
    /// policy either way.
    pub require_production: bool,
}

impl Default for BrokerPolicy {
    fn default() -> Self {
        Self {
            max_request_tokens: 10,
            require_production: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("forward request contained no candidates")]
    EmptyRequest,
    #[error("forward request contained {count} candidates, at most {max} are allowed")]
    TooManyCandidates { count: usize, max: usize },
    #[error("no workload instance is available")]
    NoAvailableInstance,
}

/// Why a single forward candidate was passed over
#[derive(Debug, thiserror::Error)]
enum CandidateError {
    #[error("token failed verification: {0}")]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    MissingClaim(#[from] MissingClaimError),
    #[error("instance {0} is not registered")]
    NotRegistered(String),
    #[error("forwarding failed: {0}")]
    Transport(#[from] TransportError),
}

pub struct Broker {
    endpoint: BrokerEndpoint,
    policy: BrokerPolicy,
    verifier: AttestationVerifier,
    transport: Arc<dyn WorkloadTransport>,
    registrations: ArcSwap<HashSet<Registration>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .field("registrations", &self.registrations.load().len())
            .finish()
    }
}

impl Broker {
    pub fn new(
        endpoint: BrokerEndpoint,
        policy: BrokerPolicy,
        verifier: AttestationVerifier,
        transport: Arc<dyn WorkloadTransport>,
    ) -> Self {
        Self {
            endpoint,
            policy,
            verifier,
            transport,
            registrations: ArcSwap::from_pointee(HashSet::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn policy(&self) -> &BrokerPolicy {
        &self.policy
    }

    /// The current generation of registrations.
    pub fn registrations(&self) -> Arc<HashSet<Registration>> {
        self.registrations.load_full()
    }

    /// Number of times the registration set has been replaced
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the registration set wholesale.
    ///
    /// Readers holding the previous generation keep using it until they
    /// load again.
    pub fn refresh_registrations(&self, registrations: HashSet<Registration>) {
        self.registrations.store(Arc::new(registrations));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// A uniformly random sample of current registrations, as tokens.
    pub fn issue_tokens(&self) -> Vec<RequestToken> {
        let snapshot = self.registrations.load();
        let mut tokens: Vec<RequestToken> = snapshot.iter().map(RequestToken::from).collect();

        tokens.shuffle(&mut rand::rng());
        tokens.truncate(self.policy.max_request_tokens);
        tokens
    }

    /// Relay a sealed payload to the first candidate that verifies, is still
    /// registered, and answers.
    ///
    /// Candidates are tried in the order given. Failures of individual
    /// candidates are logged and skipped.
    pub async fn forward(
        &self,
        requests: Vec<WorkloadRequest>,
    ) -> Result<EncryptedMessage, ForwardError> {
        if requests.is_empty() {
            return Err(ForwardError::EmptyRequest);
        }
        if requests.len() > self.policy.max_request_tokens {
            return Err(ForwardError::TooManyCandidates {
                count: requests.len(),
                max: self.policy.max_request_tokens,
            });
        }

        let snapshot = self.registrations.load_full();

        for (candidate, request) in requests.iter().enumerate() {
            match self.try_candidate(&snapshot, request).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    tracing::warn!(candidate, "skipping forward candidate: {}", e);
                }
            }
        }

        Err(ForwardError::NoAvailableInstance)
    }

    async fn try_candidate(
        &self,
        snapshot: &HashSet<Registration>,
        request: &WorkloadRequest,
    ) -> Result<EncryptedMessage, CandidateError> {
        let payload = self
            .verifier
            .verify(
                request.token.attestation_token(),
                self.endpoint.audience(),
                self.policy.require_production,
            )
            .await?;

        let instance_name = payload.instance_name()?;
        let zone = payload.instance_zone()?;
        let project_id = payload.project_id()?;

        let registration = snapshot
            .iter()
            .find(|r| r.matches(project_id, zone, instance_name))
            .ok_or_else(|| CandidateError::NotRegistered(instance_name.to_string()))?;

        let reply = self
            .transport
            .send(registration, &request.message)
            .await?;

        tracing::info!(
            instance = %registration.instance_name,
            zone = %registration.zone,
            "forwarded request"
        );
        Ok(reply)
    }
}

#[async_trait::async_trait]
impl DataSource for Broker {
    /// Ready once discovery has completed a cycle.
    async fn is_ready(&self) -> Result<(), DataSourceError> {
        if self.generation() == 0 {
            return Err(DataSourceError::DependencyFailure(
                "no discovery cycle has completed".to_string(),
            ));
        }
        Ok(())
    }
}
