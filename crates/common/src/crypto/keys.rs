use std::fmt;
use std::hash::{Hash, Hasher};

use aes_gcm::aead::OsRng;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use super::hybrid::{self, CryptoError, POINT_SIZE};

/// Longest nonce fragment the attestation service accepts
pub const MAX_NONCE_LENGTH: usize = 74;
/// Shortest nonce fragment the attestation service accepts
pub const MIN_NONCE_LENGTH: usize = 10;

/// Public half of a [`HybridKeyPair`]
///
/// Safe to copy to peers. Serialized as an uncompressed SEC1 point, either
/// raw (65 bytes) or base64-encoded when embedded in an attestation token.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_base64()).finish()
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl From<p256::PublicKey> for PublicKey {
    fn from(key: p256::PublicKey) -> Self {
        Self(key)
    }
}

impl PublicKey {
    /// Encrypt `plaintext` so that only the matching private key can read it.
    ///
    /// `associated_data` is authenticated but not encrypted; pass an empty
    /// slice when there is none. The same bytes must be supplied to
    /// [`PrivateKey::decrypt`].
    pub fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        hybrid::seal(&self.0, plaintext, associated_data)
    }

    /// Uncompressed SEC1 encoding of the key
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != POINT_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                POINT_SIZE,
                bytes.len()
            )));
        }
        p256::PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey("not a point on P-256".to_string()))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("invalid base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Split the base64 form into fragments the attestation service accepts
    /// as nonces.
    ///
    /// Fragments are evenly sized so that none falls below
    /// [`MIN_NONCE_LENGTH`] or exceeds [`MAX_NONCE_LENGTH`].
    pub fn to_nonces(&self) -> Vec<String> {
        let encoded = self.to_base64();
        let count = encoded.len().div_ceil(MAX_NONCE_LENGTH);
        let size = encoded.len().div_ceil(count);

        encoded
            .as_bytes()
            .chunks(size)
            // base64 output is ASCII
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }

    /// Reassemble a key from the fragments produced by [`PublicKey::to_nonces`].
    pub fn from_nonces<S: AsRef<str>>(fragments: &[S]) -> Result<Self, CryptoError> {
        if fragments.is_empty() {
            return Err(CryptoError::InvalidKey("no nonce fragments".to_string()));
        }
        let joined: String = fragments.iter().map(|f| f.as_ref()).collect();
        Self::from_base64(&joined)
    }
}

/// Private half of a [`HybridKeyPair`]
///
/// Never serialized or transmitted. The inner scalar is zeroized on drop.
pub struct PrivateKey(p256::SecretKey);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PrivateKey {
    /// Decrypt a ciphertext produced by [`PublicKey::encrypt`].
    ///
    /// Fails with [`CryptoError::Authentication`] if the ciphertext was
    /// modified, was sealed for another key, or `associated_data` differs from
    /// what the sender bound.
    pub fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        hybrid::open(&self.0, ciphertext, associated_data)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }
}

/// A key pair for hybrid public-key encryption
///
/// Servers generate one per process, clients one per prompt. Immutable once
/// created.
///
/// # Examples
///
/// ```ignore
/// let recipient = HybridKeyPair::generate();
/// let ciphertext = recipient.public_key().encrypt(b"hello", &[])?;
/// let plaintext = recipient.private_key().decrypt(&ciphertext, &[])?;
/// assert_eq!(plaintext, b"hello");
/// ```
#[derive(Debug)]
pub struct HybridKeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl HybridKeyPair {
    pub fn generate() -> Self {
        let secret = p256::SecretKey::random(&mut OsRng);
        let private = PrivateKey(secret);
        Self {
            public: private.public_key(),
            private,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }
}
