//! Compact binary map encoding for request/response payloads
//!
//! The backend exchanges schema-less maps (string keys; null, bool, number,
//! string, array and nested-map values). They are kept in memory as
//! `serde_json::Value` and CBOR-encoded at the wire boundary.

use serde_json::Value;

use crate::error::{ClientError, ClientResult};

/// Encode a schema-less body for transmission.
pub fn encode(body: &Value) -> ClientResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(body, &mut buf).map_err(|e| ClientError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decode a received binary body back into a schema-less value.
pub fn decode(bytes: &[u8]) -> ClientResult<Value> {
    ciborium::from_reader(bytes).map_err(|e: ciborium::de::Error<std::io::Error>| {
        ClientError::Codec(e.to_string())
    })
}
