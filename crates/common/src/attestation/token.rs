use std::fmt;

use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

use super::claims::{AttestationClaims, GceClaims};
use super::keys::KeySet;
use super::{MissingClaimError, VerificationError, ATTESTATION_ISSUER, PRODUCTION_DEBUG_STATUS};

/// Tolerated clock skew when checking `exp`, in seconds
const CLOCK_SKEW_LEEWAY_SECS: u64 = 60;

/// A signed attestation token as handed out by the TEE launcher
///
/// Opaque until verified. Serializes as the bare JWT string.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttestationToken(String);

impl fmt::Debug for AttestationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(16).collect();
        write!(f, "AttestationToken({}..)", prefix)
    }
}

impl From<String> for AttestationToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl AttestationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify the token against `keys`.
    ///
    /// Checks the signature, the issuer, that the audience equals
    /// `expected_audience`, and expiry. With `require_production` the VM must
    /// also report debugging as disabled since boot.
    pub fn verify_with(
        &self,
        keys: &KeySet,
        expected_audience: &str,
        require_production: bool,
    ) -> Result<AttestationPayload, VerificationError> {
        let header = decode_header(&self.0).map_err(VerificationError::Malformed)?;
        let kid = header.kid.ok_or(VerificationError::MissingKeyId)?;
        let (algorithm, key) = keys
            .get(&kid)
            .ok_or_else(|| VerificationError::UnknownKey(kid.clone()))?;

        if header.alg != *algorithm {
            return Err(VerificationError::AlgorithmMismatch {
                expected: *algorithm,
                actual: header.alg,
            });
        }

        let mut validation = Validation::new(*algorithm);
        validation.set_issuer(&[ATTESTATION_ISSUER]);
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;

        let data = decode::<AttestationClaims>(&self.0, key, &validation)
            .map_err(VerificationError::Invalid)?;
        let payload = AttestationPayload {
            claims: data.claims,
        };

        if require_production && !payload.is_production() {
            return Err(VerificationError::DebugWorkload(
                payload
                    .claims
                    .dbgstat
                    .clone()
                    .unwrap_or_else(|| "absent".to_string()),
            ));
        }

        Ok(payload)
    }
}

/// Claims of a token that passed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationPayload {
    claims: AttestationClaims,
}

impl AttestationPayload {
    pub fn claims(&self) -> &AttestationClaims {
        &self.claims
    }

    pub fn is_production(&self) -> bool {
        self.claims.dbgstat.as_deref() == Some(PRODUCTION_DEBUG_STATUS)
    }

    fn gce(&self) -> Option<&GceClaims> {
        self.claims.submods.as_ref()?.gce.as_ref()
    }

    pub fn instance_name(&self) -> Result<&str, MissingClaimError> {
        self.gce()
            .and_then(|gce| gce.instance_name.as_deref())
            .ok_or(MissingClaimError("submods.gce.instance_name"))
    }

    pub fn instance_zone(&self) -> Result<&str, MissingClaimError> {
        self.gce()
            .and_then(|gce| gce.zone.as_deref())
            .ok_or(MissingClaimError("submods.gce.zone"))
    }

    pub fn project_id(&self) -> Result<&str, MissingClaimError> {
        self.gce()
            .and_then(|gce| gce.project_id.as_deref())
            .ok_or(MissingClaimError("submods.gce.project_id"))
    }

    /// The workload's request-encryption key, reassembled from the nonce
    /// fragments it asked the launcher to embed.
    pub fn request_encryption_key(&self) -> Result<PublicKey, VerificationError> {
        let nonce = self
            .claims
            .eat_nonce
            .as_ref()
            .ok_or(VerificationError::MissingRequestKey)?;

        PublicKey::from_nonces(nonce.fragments())
            .map_err(|e| VerificationError::InvalidRequestKey(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::HybridKeyPair;
    use crate::testkit::TestAuthority;

    const AUDIENCE: &str = "https://broker-1.us-central1.run.app/";

    #[test]
    fn test_verify_valid_token() {
        let authority = TestAuthority::new();
        let workload = HybridKeyPair::generate();
        let token = authority
            .token(AUDIENCE)
            .production(true)
            .instance("workload-1", "us-central1-a", "my-project")
            .request_key(workload.public_key())
            .sign();

        let payload = token
            .verify_with(&authority.key_set(), AUDIENCE, true)
            .unwrap();

        assert!(payload.is_production());
        assert_eq!(payload.instance_name().unwrap(), "workload-1");
        assert_eq!(payload.instance_zone().unwrap(), "us-central1-a");
        assert_eq!(payload.project_id().unwrap(), "my-project");
        assert_eq!(
            &payload.request_encryption_key().unwrap(),
            workload.public_key()
        );
    }

    #[test]
    fn test_audience_binding() {
        let authority = TestAuthority::new();
        let token = authority.token(AUDIENCE).sign();

        assert!(token.verify_with(&authority.key_set(), AUDIENCE, false).is_ok());

        let err = token
            .verify_with(
                &authority.key_set(),
                "https://broker-2.us-central1.run.app/",
                false,
            )
            .unwrap_err();
        assert!(matches!(err, VerificationError::Invalid(_)));
    }

    #[test]
    fn test_production_policy() {
        let authority = TestAuthority::new();
        let debug = authority.token(AUDIENCE).production(false).sign();

        let payload = debug
            .verify_with(&authority.key_set(), AUDIENCE, false)
            .unwrap();
        assert!(!payload.is_production());

        let err = debug
            .verify_with(&authority.key_set(), AUDIENCE, true)
            .unwrap_err();
        assert!(matches!(err, VerificationError::DebugWorkload(status) if status == "enabled"));
    }

    #[test]
    fn test_rejects_foreign_issuer() {
        let authority = TestAuthority::new();
        let token = authority
            .token(AUDIENCE)
            .issuer("https://attacker.example.com")
            .sign();

        let err = token
            .verify_with(&authority.key_set(), AUDIENCE, false)
            .unwrap_err();
        assert!(matches!(err, VerificationError::Invalid(_)));
    }

    #[test]
    fn test_rejects_expired_token() {
        let authority = TestAuthority::new();
        let token = authority.token(AUDIENCE).expired().sign();

        let err = token
            .verify_with(&authority.key_set(), AUDIENCE, false)
            .unwrap_err();
        assert!(matches!(err, VerificationError::Invalid(_)));
    }

    #[test]
    fn test_rejects_token_from_other_signer() {
        let authority = TestAuthority::new();
        let impostor = TestAuthority::with_key_id(authority.key_id());
        let token = impostor.token(AUDIENCE).sign();

        let err = token
            .verify_with(&authority.key_set(), AUDIENCE, false)
            .unwrap_err();
        assert!(matches!(err, VerificationError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_key_and_garbage() {
        let authority = TestAuthority::new();
        let token = TestAuthority::new().token(AUDIENCE).sign();

        let err = token
            .verify_with(&authority.key_set(), AUDIENCE, false)
            .unwrap_err();
        assert!(matches!(err, VerificationError::UnknownKey(_)));

        let err = AttestationToken::new("not-a-jwt")
            .verify_with(&authority.key_set(), AUDIENCE, false)
            .unwrap_err();
        assert!(matches!(err, VerificationError::Malformed(_)));
    }

    #[test]
    fn test_missing_claims() {
        let authority = TestAuthority::new();
        let token = authority.token(AUDIENCE).sign();
        let payload = token
            .verify_with(&authority.key_set(), AUDIENCE, false)
            .unwrap();

        assert_eq!(
            payload.instance_name().unwrap_err(),
            MissingClaimError("submods.gce.instance_name")
        );
        assert!(payload.instance_zone().is_err());
        assert!(payload.project_id().is_err());
        assert!(matches!(
            payload.request_encryption_key(),
            Err(VerificationError::MissingRequestKey)
        ));
    }

    #[test]
    fn test_malformed_request_key() {
        let authority = TestAuthority::new();
        let token = authority
            .token(AUDIENCE)
            .nonces(vec!["bm90IGEga2V5IGF0IGFsbA==".to_string()])
            .sign();
        let payload = token
            .verify_with(&authority.key_set(), AUDIENCE, false)
            .unwrap();

        assert!(matches!(
            payload.request_encryption_key(),
            Err(VerificationError::InvalidRequestKey(_))
        ));
    }
}
