//! Decoding raw bus payloads into typed order events.

use thiserror::Error;

use crate::types::OrderEvent;

/// A payload which could not be turned into an [OrderEvent].
///
/// Decode failures are never fatal to the stream, the ingest loop counts
/// and drops them.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload was not valid UTF-8
    #[error("Payload is not valid UTF-8")]
    NotUtf8(#[source] std::str::Utf8Error),
    /// Payload was valid UTF-8 but not a document matching the order schema
    #[error("Payload does not match the order event schema")]
    Schema(#[source] serde_json::Error),
}

/// Parse a raw payload against the fixed order event schema.
///
/// All fields are required; the `items` array may be empty.
pub fn decode_order(payload: &[u8]) -> Result<OrderEvent, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(DecodeError::NotUtf8)?;
    serde_json::from_str(text).map_err(DecodeError::Schema)
}
