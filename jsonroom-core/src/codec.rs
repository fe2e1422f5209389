//! Binary ⇄ text codec for CRDT update payloads.
//!
//! Updates travel inside a JSON envelope, so the raw yrs bytes are carried
//! as standard (padded) base64. The engine handles arbitrarily long input in
//! one pass, so there are no chunk boundaries to get wrong.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// A transport payload that is not valid base64.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed update payload: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Encode update bytes for embedding in a text envelope.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a text payload back into update bytes.
///
/// A failed decode must never reach the replica.
pub fn decode(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(text.trim())?)
}
