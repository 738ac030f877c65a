use crate::crypto::PublicKey;

use super::{EncryptedMessage, ProtocolError};

const LENGTH_SIZE: usize = 4;

/// A plaintext payload on its way to (or back from) a recipient
///
/// `sender_key` is present exactly when the sender expects an encrypted
/// reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: String,
    sender_key: Option<PublicKey>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            sender_key: None,
        }
    }

    /// Attach the key the recipient should encrypt its reply to.
    pub fn with_sender_key(mut self, key: PublicKey) -> Self {
        self.sender_key = Some(key);
        self
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    pub fn sender_key(&self) -> Option<&PublicKey> {
        self.sender_key.as_ref()
    }

    /// Seal this message for `recipient`.
    pub fn encrypt(&self, recipient: &PublicKey) -> Result<EncryptedMessage, ProtocolError> {
        let plaintext = self.to_plaintext()?;
        let cipher_text = recipient.encrypt(&plaintext, &[])?;
        Ok(EncryptedMessage::new(cipher_text))
    }

    pub(crate) fn to_plaintext(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = self.body.as_bytes();
        let body_len =
            u32::try_from(body.len()).map_err(|_| ProtocolError::BodyTooLarge(body.len()))?;

        let key = self.sender_key.as_ref().map(PublicKey::to_bytes);

        let mut out = Vec::with_capacity(
            LENGTH_SIZE + body.len() + key.as_ref().map_or(0, |k| LENGTH_SIZE + k.len()),
        );
        out.extend_from_slice(&body_len.to_be_bytes());
        out.extend_from_slice(body);

        if let Some(key) = key {
            // SEC1 points are 65 bytes, this cannot overflow
            out.extend_from_slice(&(key.len() as u32).to_be_bytes());
            out.extend_from_slice(&key);
        }

        Ok(out)
    }

    pub(crate) fn from_plaintext(plaintext: &[u8]) -> Result<Self, ProtocolError> {
        let mut rest = plaintext;

        let body = take_field(&mut rest)?;
        let body = String::from_utf8(body.to_vec())?;

        let sender_key = if rest.is_empty() {
            None
        } else {
            let key = take_field(&mut rest)?;
            let key = PublicKey::from_bytes(key)
                .map_err(|e| ProtocolError::InvalidSenderKey(e.to_string()))?;
            Some(key)
        };

        if !rest.is_empty() {
            return Err(ProtocolError::TrailingData(rest.len()));
        }

        Ok(Self { body, sender_key })
    }
}

/// Split one length-prefixed field off the front of `rest`.
fn take_field<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8], ProtocolError> {
    if rest.len() < LENGTH_SIZE {
        return Err(ProtocolError::Truncated {
            expected: LENGTH_SIZE,
        });
    }
    let (header, tail) = rest.split_at(LENGTH_SIZE);
    let mut length = [0u8; LENGTH_SIZE];
    length.copy_from_slice(header);
    let length = u32::from_be_bytes(length) as usize;

    if tail.len() < length {
        return Err(ProtocolError::Truncated { expected: length });
    }
    let (field, tail) = tail.split_at(length);
    *rest = tail;
    Ok(field)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{CryptoError, HybridKeyPair};

    #[test]
    fn test_round_trip_with_sender_key() {
        let sender = HybridKeyPair::generate();
        let recipient = HybridKeyPair::generate();

        let message = Message::new("what is the airspeed of an unladen swallow?")
            .with_sender_key(sender.public_key().clone());
        let encrypted = message.encrypt(recipient.public_key()).unwrap();
        let decrypted = encrypted.decrypt(recipient.private_key()).unwrap();

        assert_eq!(decrypted.body(), message.body());
        assert_eq!(decrypted.sender_key(), Some(sender.public_key()));
    }

    #[test]
    fn test_round_trip_without_sender_key() {
        let recipient = HybridKeyPair::generate();

        let encrypted = Message::new("").encrypt(recipient.public_key()).unwrap();
        let decrypted = encrypted.decrypt(recipient.private_key()).unwrap();

        assert_eq!(decrypted.body(), "");
        assert!(decrypted.sender_key().is_none());
    }

    #[test]
    fn test_reply_path() {
        let client = HybridKeyPair::generate();
        let server = HybridKeyPair::generate();

        let request = Message::new("ping")
            .with_sender_key(client.public_key().clone())
            .encrypt(server.public_key())
            .unwrap();

        let received = request.decrypt(server.private_key()).unwrap();
        let reply_key = received.sender_key().unwrap();
        let reply = Message::new("pong").encrypt(reply_key).unwrap();

        assert!(reply.decrypt(server.private_key()).is_err());
        assert_eq!(reply.decrypt(client.private_key()).unwrap().body(), "pong");
    }

    #[test]
    fn test_unicode_body() {
        let recipient = HybridKeyPair::generate();
        let body = "grüße, 世界 🦀";

        let encrypted = Message::new(body).encrypt(recipient.public_key()).unwrap();
        assert_eq!(encrypted.decrypt(recipient.private_key()).unwrap().body(), body);
    }

    #[test]
    fn test_tampered_ciphertext_is_a_crypto_error() {
        let recipient = HybridKeyPair::generate();
        let encrypted = Message::new("ping").encrypt(recipient.public_key()).unwrap();

        let mut bytes = encrypted.cipher_text().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;

        let err = EncryptedMessage::new(bytes)
            .decrypt(recipient.private_key())
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Crypto(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_malformed_plaintext() {
        // body length runs past the end
        assert!(matches!(
            Message::from_plaintext(&[0, 0, 0, 9, b'a']),
            Err(ProtocolError::Truncated { .. })
        ));

        // invalid UTF-8
        assert!(matches!(
            Message::from_plaintext(&[0, 0, 0, 2, 0xc3, 0x28]),
            Err(ProtocolError::InvalidUtf8(_))
        ));

        // sender key that is not a point
        assert!(matches!(
            Message::from_plaintext(&[0, 0, 0, 1, b'a', 0, 0, 0, 2, 1, 2]),
            Err(ProtocolError::InvalidSenderKey(_))
        ));

        // dangling bytes after the body
        assert!(matches!(
            Message::from_plaintext(&[0, 0, 0, 1, b'a', 7]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_after_key() {
        let key = HybridKeyPair::generate();
        let mut plaintext = Message::new("a")
            .with_sender_key(key.public_key().clone())
            .to_plaintext()
            .unwrap();
        plaintext.push(0);

        assert!(matches!(
            Message::from_plaintext(&plaintext),
            Err(ProtocolError::TrailingData(1))
        ));
    }
}
