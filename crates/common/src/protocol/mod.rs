//! Envelope protocol
//!
//! A [`Message`] is a plaintext prompt (or reply) plus, optionally, the
//! sender's public key. Sealing it for a recipient yields an
//! [`EncryptedMessage`], the only form that ever leaves a process.
//!
//! The hybrid primitive only encrypts towards a recipient. A sender that
//! expects an answer attaches its own public key to the message; the
//! recipient answers with an independent encryption to that key. There is no
//! session state beyond this hand-off.
//!
//! # Plaintext Layout
//!
//! ```text
//! [ body_len: u32 BE ][ body: UTF-8 ][ key_len: u32 BE ][ sender_key ]
//!                                     \________ optional ________/
//! ```
//!
//! # Wire Framing
//!
//! ```text
//! [ len: u32 BE ][ ciphertext: len bytes ]
//! ```
//!
//! Receivers reject `len == 0` and `len > max_size` before reading the body.

mod encrypted_message;
mod message;

pub use encrypted_message::{EncryptedMessage, DEFAULT_MAX_MESSAGE_SIZE, FRAME_HEADER_SIZE};
pub use message::Message;

use crate::crypto::CryptoError;

/// Errors raised while building, framing or opening an envelope
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame length must not be zero")]
    EmptyFrame,
    #[error("frame length {length} exceeds the maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },
    #[error("frame ended early: expected {expected} bytes")]
    Truncated { expected: usize },
    #[error("{0} unexpected trailing bytes")]
    TrailingData(usize),
    #[error("message body is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid sender key: {0}")]
    InvalidSenderKey(String),
    #[error("message body too large: {0} bytes")]
    BodyTooLarge(usize),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
