/**
 * Signed statements about the TEE a workload runs in.
 *  - Token verification pinned to the Confidential
 *    Space issuer and its published keys
 *  - Typed access to instance identity and the
 *    embedded request-encryption key
 */
pub mod attestation;
/**
 * Cryptographic types and operations.
 *  - Hybrid (ECIES) public key encryption
 *  - Key pairs for workloads and clients
 */
pub mod crypto;
/**
 * The envelope protocol spoken between clients
 *  and workloads, relayed blind by the broker.
 */
pub mod protocol;
/**
 * Local attestation issuer for tests.
 */
pub mod testkit;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::attestation::{
        AttestationPayload, AttestationToken, AttestationVerifier, MissingClaimError,
        VerificationError,
    };
    pub use crate::crypto::{CryptoError, HybridKeyPair, PrivateKey, PublicKey};
    pub use crate::protocol::{EncryptedMessage, Message, ProtocolError};
    pub use crate::version::build_info;
}
