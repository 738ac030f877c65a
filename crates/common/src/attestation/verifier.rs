use std::fmt;
use std::sync::Arc;

use super::keys::{JwksKeyProvider, KeyProvider};
use super::token::{AttestationPayload, AttestationToken};
use super::VerificationError;

/// Verifies attestation tokens against the issuer's current signing keys
///
/// Cheap to clone; clones share the key cache.
#[derive(Clone)]
pub struct AttestationVerifier {
    keys: Arc<dyn KeyProvider>,
}

impl fmt::Debug for AttestationVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationVerifier").finish()
    }
}

impl AttestationVerifier {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    /// Verifier backed by the Confidential Space issuer's published keys.
    pub fn confidential_space(client: reqwest::Client) -> Self {
        Self::new(Arc::new(JwksKeyProvider::new(client)))
    }

    pub async fn verify(
        &self,
        token: &AttestationToken,
        expected_audience: &str,
        require_production: bool,
    ) -> Result<AttestationPayload, VerificationError> {
        let keys = self.keys.keys().await?;
        match token.verify_with(&keys, expected_audience, require_production) {
            Err(VerificationError::UnknownKey(kid)) => {
                tracing::debug!(kid, "token signed with unknown key, refreshing key set");
                let keys = self.keys.refresh().await?;
                token.verify_with(&keys, expected_audience, require_production)
            }
            result => result,
        }
    }
}
