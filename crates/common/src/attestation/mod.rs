//! Attestation tokens issued to Confidential Space workloads
//!
//! A workload asks the TEE launcher for a signed OIDC token whose claims
//! describe the VM (debug status, instance identity) and carry the workload's
//! request-encryption key as nonce fragments. Anyone holding the token can
//! check, offline apart from fetching the issuer's signing keys, that the key
//! belongs to code running in a genuine TEE.
//!
//! Verification is pinned to [`ATTESTATION_ISSUER`] and its key set at
//! [`ATTESTATION_JWKS_URL`]. The expected audience binds a token to a single
//! broker so it cannot be replayed against another one.

mod claims;
mod keys;
mod token;
mod verifier;

pub use claims::{AttestationClaims, EatNonce, GceClaims, Submods};
pub use keys::{JwksKeyProvider, KeyProvider, KeySet, StaticKeys};
pub use token::{AttestationPayload, AttestationToken};
pub use verifier::AttestationVerifier;

/// The only issuer whose tokens are accepted
pub const ATTESTATION_ISSUER: &str = "https://confidentialcomputing.googleapis.com";
/// Where the issuer publishes its signing keys
pub const ATTESTATION_JWKS_URL: &str = "https://www.googleapis.com/service_accounts/v1/metadata/jwk/signer@confidentialspace-sign.iam.gserviceaccount.com";
/// `dbgstat` value of a VM that has never allowed debugging
pub const PRODUCTION_DEBUG_STATUS: &str = "disabled-since-boot";

/// A claim the token must carry to name an instance is absent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attestation token is missing claim {0}")]
pub struct MissingClaimError(pub &'static str);

/// Errors raised while verifying an attestation token
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),
    #[error("token header has no key id")]
    MissingKeyId,
    #[error("token signed with unknown key {0}")]
    UnknownKey(String),
    #[error("token algorithm {actual:?} does not match key algorithm {expected:?}")]
    AlgorithmMismatch {
        expected: jsonwebtoken::Algorithm,
        actual: jsonwebtoken::Algorithm,
    },
    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("workload is not running in production mode (dbgstat: {0})")]
    DebugWorkload(String),
    #[error("token does not carry a request encryption key")]
    MissingRequestKey,
    #[error("token carries an invalid request encryption key: {0}")]
    InvalidRequestKey(String),
    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(String),
    #[error(transparent)]
    MissingClaim(#[from] MissingClaimError),
}
