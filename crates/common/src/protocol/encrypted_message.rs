use std::io::{Cursor, ErrorKind, Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::PrivateKey;

use super::{Message, ProtocolError};

/// Largest ciphertext a receiver accepts unless configured otherwise
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;
/// Size of the big-endian length prefix on the wire
pub const FRAME_HEADER_SIZE: usize = 4;

/// A sealed [`Message`], the only form of a payload that crosses process
/// boundaries
///
/// The broker relays these verbatim and never holds a key that opens them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    cipher_text: Vec<u8>,
}

impl EncryptedMessage {
    pub fn new(cipher_text: Vec<u8>) -> Self {
        Self { cipher_text }
    }

    pub fn cipher_text(&self) -> &[u8] {
        &self.cipher_text
    }

    pub fn len(&self) -> usize {
        self.cipher_text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cipher_text.is_empty()
    }

    /// Open the envelope with the recipient's private key.
    ///
    /// Authentication failures surface as [`ProtocolError::Crypto`]; a
    /// plaintext that does not parse is a protocol violation.
    pub fn decrypt(&self, recipient: &PrivateKey) -> Result<Message, ProtocolError> {
        let plaintext = recipient.decrypt(&self.cipher_text, &[])?;
        Message::from_plaintext(&plaintext)
    }

    /// Write a length-prefixed frame.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let length = u32::try_from(self.cipher_text.len())
            .map_err(|_| ProtocolError::BodyTooLarge(self.cipher_text.len()))?;
        writer.write_all(&length.to_be_bytes())?;
        writer.write_all(&self.cipher_text)?;
        Ok(())
    }

    /// Read one length-prefixed frame.
    ///
    /// The length is validated against `max_size` before anything is
    /// allocated for the body.
    pub fn read<R: Read>(reader: &mut R, max_size: usize) -> Result<Self, ProtocolError> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        read_exact(reader, &mut header)?;

        let length = u32::from_be_bytes(header) as usize;
        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if length > max_size {
            return Err(ProtocolError::FrameTooLarge {
                length,
                max: max_size,
            });
        }

        let mut cipher_text = vec![0u8; length];
        read_exact(reader, &mut cipher_text)?;
        Ok(Self { cipher_text })
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.cipher_text.len());
        self.write(&mut out)?;
        Ok(out)
    }

    /// Parse a buffer holding exactly one frame.
    pub fn from_frame(frame: &[u8], max_size: usize) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(frame);
        let message = Self::read(&mut cursor, max_size)?;

        let consumed = cursor.position() as usize;
        if consumed != frame.len() {
            return Err(ProtocolError::TrailingData(frame.len() - consumed));
        }
        Ok(message)
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ProtocolError::Truncated {
            expected: buf.len(),
        },
        _ => ProtocolError::Io(e),
    })
}

impl Serialize for EncryptedMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.cipher_text))
    }
}

impl<'de> Deserialize<'de> for EncryptedMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let cipher_text = STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Self { cipher_text })
    }
}
