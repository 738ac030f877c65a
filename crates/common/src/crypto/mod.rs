//! Hybrid public-key encryption for request and reply payloads
//!
//! Every server process (and every client prompt) holds a [`HybridKeyPair`].
//! Peers only ever see the [`PublicKey`], which they use to seal payloads that
//! only the matching [`PrivateKey`] can open.
//!
//! # Construction
//!
//! ECIES over NIST P-256:
//!
//! 1. Generate an ephemeral P-256 key pair
//! 2. ECDH between the ephemeral secret and the recipient's public key
//! 3. HKDF-SHA256 over `ephemeral_point || shared_x`, with the caller's
//!    associated data as the HKDF `info`, yields a 128-bit key
//! 4. AES-128-GCM seals the plaintext under that key
//!
//! The derived key is single-use, so the AEAD nonce is fixed at zero. Because
//! the associated data feeds the key derivation, a mismatch surfaces as an
//! authentication failure at decryption time.
//!
//! # Wire Format
//!
//! ```text
//! [ ephemeral_point: 65 bytes ][ aes_gcm_ciphertext: n bytes ][ tag: 16 bytes ]
//! ```
//!
//! The primitive is one-directional. Replies are encrypted with a fresh,
//! independent operation against a key the sender handed over in its request
//! (see [`crate::protocol`]).

mod hybrid;
mod keys;

pub use hybrid::{CryptoError, CIPHERTEXT_OVERHEAD, POINT_SIZE};
pub use keys::{HybridKeyPair, PrivateKey, PublicKey, MAX_NONCE_LENGTH, MIN_NONCE_LENGTH};
