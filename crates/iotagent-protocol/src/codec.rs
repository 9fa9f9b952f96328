//! Payload codec for transport message bodies.
//!
//! Bodies are expected to be UTF-8 JSON. Anything that does not decode is
//! kept as its hex rendering so the message can still go through as an
//! opaque single value.

use iotagent_core::ParsedPayload;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::messages::{ConfigurationNotification, ConfigurationRequest};

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("Failed to (de)serialize message: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// A configuration request element was not a JSON object.
    #[error("Configuration request must be a JSON object")]
    NotAnObject,
}

/// Decode a raw message body.
///
/// Never fails: a body that is not valid JSON decodes to
/// [`ParsedPayload::Opaque`] with the lowercase hex encoding of its bytes.
pub fn decode(body: &[u8]) -> ParsedPayload {
    let payload = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(values)) => ParsedPayload::Batch(values),
        Ok(value) => ParsedPayload::Single(value),
        Err(e) => {
            debug!("Body is not JSON ({}), keeping it as hex", e);
            ParsedPayload::opaque(hex::encode(body))
        }
    };
    debug!(
        "Decoded body {:?} into {} element(s)",
        String::from_utf8_lossy(body),
        payload.len()
    );
    payload
}

/// Decode one element of a configuration-request payload.
pub fn decode_configuration_request(value: &Value) -> Result<ConfigurationRequest, CodecError> {
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    ConfigurationRequest::deserialize(value).map_err(CodecError::from)
}

/// Encode a configuration notification for publication.
pub fn encode_notification(notification: &ConfigurationNotification) -> Result<String, CodecError> {
    serde_json::to_string(notification).map_err(CodecError::from)
}
