//! `base64://` secret codec.
//!
//! Sensitive values in spec documents may be stored as
//! `base64://<payload>`; anything without the prefix passes through
//! unchanged, so plain values and encoded values can coexist in the
//! same document.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Marker prefix for encoded values.
pub const ENCODE_PREFIX: &str = "base64://";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
    #[error("decoded payload is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

/// Encode a plaintext value, adding the marker prefix.
/// Empty input encodes to itself.
pub fn encode(plaintext: &str) -> String {
    if plaintext.is_empty() {
        return String::new();
    }
    format!("{ENCODE_PREFIX}{}", STANDARD.encode(plaintext))
}

/// Decode a value carrying the marker prefix.
///
/// Values without the prefix are returned unchanged.
///
/// # Errors
///
/// Returns an error if the payload after the prefix is not valid base64
/// or does not decode to UTF-8.
pub fn decode(value: &str) -> Result<String, CodecError> {
    let Some(raw) = value.strip_prefix(ENCODE_PREFIX) else {
        return Ok(value.to_string());
    };
    let bytes = STANDARD.decode(raw)?;
    Ok(String::from_utf8(bytes)?)
}
