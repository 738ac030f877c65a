use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Nonce};
use hkdf::Hkdf;
use p256::ecdh::{diffie_hellman, EphemeralSecret};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::Sha256;

/// Size of an uncompressed SEC1 P-256 point in bytes
pub const POINT_SIZE: usize = 65;
/// Size of the derived AES-128 key in bytes
const KEY_SIZE: usize = 16;
/// Size of the AES-GCM authentication tag in bytes
const TAG_SIZE: usize = 16;
/// Bytes added to every plaintext by [`seal`]
pub const CIPHERTEXT_OVERHEAD: usize = POINT_SIZE + TAG_SIZE;

// Each derived key encrypts exactly one message.
const NONCE: [u8; 12] = [0u8; 12];

/// Errors raised by the hybrid encryption primitive
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: ciphertext or associated data was not authentic")]
    Authentication,
}

fn derive_key(
    ephemeral_point: &[u8],
    shared_secret: &[u8],
    associated_data: &[u8],
) -> Result<Aes128Gcm, CryptoError> {
    let mut ikm = Vec::with_capacity(ephemeral_point.len() + shared_secret.len());
    ikm.extend_from_slice(ephemeral_point);
    ikm.extend_from_slice(shared_secret);

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(associated_data, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;

    Aes128Gcm::new_from_slice(&okm).map_err(|_| CryptoError::KeyDerivation)
}

/// Encrypt `plaintext` to `recipient`, binding `associated_data`.
pub(crate) fn seal(
    recipient: &p256::PublicKey,
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_point = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(recipient);

    let cipher = derive_key(
        ephemeral_point.as_bytes(),
        shared.raw_secret_bytes().as_slice(),
        associated_data,
    )?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&NONCE), plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(POINT_SIZE + sealed.len());
    out.extend_from_slice(ephemeral_point.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a ciphertext produced by [`seal`] for the holder of `secret`.
pub(crate) fn open(
    secret: &p256::SecretKey,
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < CIPHERTEXT_OVERHEAD {
        return Err(CryptoError::Truncated {
            expected: CIPHERTEXT_OVERHEAD,
            actual: ciphertext.len(),
        });
    }

    let (point, sealed) = ciphertext.split_at(POINT_SIZE);
    // A corrupted point is indistinguishable from tampering.
    let ephemeral =
        p256::PublicKey::from_sec1_bytes(point).map_err(|_| CryptoError::Authentication)?;
    let shared = diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());

    let cipher = derive_key(point, shared.raw_secret_bytes().as_slice(), associated_data)?;
    cipher
        .decrypt(Nonce::from_slice(&NONCE), sealed)
        .map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod test {
    use super::*;

    fn recipient() -> p256::SecretKey {
        p256::SecretKey::random(&mut OsRng)
    }

    #[test]
    fn test_seal_open() {
        let secret = recipient();
        let ciphertext = seal(&secret.public_key(), b"hello", b"").unwrap();
        assert_eq!(ciphertext.len(), 5 + CIPHERTEXT_OVERHEAD);
        assert_eq!(open(&secret, &ciphertext, b"").unwrap(), b"hello");
    }

    #[test]
    fn test_seal_is_probabilistic() {
        let secret = recipient();
        let a = seal(&secret.public_key(), b"same", b"").unwrap();
        let b = seal(&secret.public_key(), b"same", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_rejects_short_input() {
        let secret = recipient();
        let err = open(&secret, &[0u8; 10], b"").unwrap_err();
        assert!(matches!(err, CryptoError::Truncated { actual: 10, .. }));
    }

    #[test]
    fn test_open_rejects_wrong_recipient() {
        let ciphertext = seal(&recipient().public_key(), b"hello", b"").unwrap();
        let err = open(&recipient(), &ciphertext, b"").unwrap_err();
        assert!(matches!(err, CryptoError::Authentication));
    }
}
