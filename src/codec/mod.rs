//! The `codec` module is the serialization boundary of the queue service.
//!
//! Payloads are handed to the publisher as already-structured data
//! (`serde_json::Value`); a [`Codec`] turns them into wire bytes and back.
//! The default is [`JsonCodec`], matching the JSON bodies the original
//! service exchanged, but callers can supply their own implementation at
//! construction time.

use serde_json::Value;

use crate::utils::error::QueueError;

/// Encodes structured payloads to bytes and decodes them back.
pub trait Codec: Send + Sync {
    fn encode(&self, payload: &Value) -> Result<Vec<u8>, QueueError>;
    fn decode(&self, body: &[u8]) -> Result<Value, QueueError>;

    /// Content type advertised to the broker, e.g. `application/json`.
    fn content_type(&self) -> &'static str;
}

/// JSON codec backed by `serde_json`. The default.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, payload: &Value) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(payload).map_err(|e| QueueError::serialization(e.to_string()))
    }

    fn decode(&self, body: &[u8]) -> Result<Value, QueueError> {
        serde_json::from_slice(body).map_err(|e| QueueError::serialization(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
