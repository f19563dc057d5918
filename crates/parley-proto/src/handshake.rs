//! Join handshake.
//!
//! The first frame a client sends on a fresh connection names the room and the
//! identity it joins as. Authentication happened upstream; the relay takes both
//! values at face value.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Wire `type` of the join request.
pub const JOIN: &str = "join";

/// Request to enter `room_id` as `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "join")]
pub struct JoinRequest {
    /// Room key
    pub room_id: String,
    /// Caller-supplied identity
    pub user_id: String,
}

impl JoinRequest {
    /// Create a join request.
    pub fn new(room_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { room_id: room_id.into(), user_id: user_id.into() }
    }

    /// Decode and validate a join request.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidHandshake` if the frame is not a `join`
    ///   message or either id is empty
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::InvalidHandshake(e.to_string()))?;

        if value.get("type").and_then(serde_json::Value::as_str) != Some(JOIN) {
            return Err(ProtocolError::InvalidHandshake(format!("expected `{JOIN}` message")));
        }

        let request: Self = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidHandshake(e.to_string()))?;

        if request.room_id.trim().is_empty() {
            return Err(ProtocolError::InvalidHandshake("empty room_id".to_string()));
        }
        if request.user_id.trim().is_empty() {
            return Err(ProtocolError::InvalidHandshake("empty user_id".to_string()));
        }

        Ok(request)
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_valid_join() {
        let request = JoinRequest::decode(br#"{"type":"join","room_id":"r1","user_id":"alice"}"#)
            .unwrap();
        assert_eq!(request, JoinRequest::new("r1", "alice"));
    }

    #[test]
    fn encoded_join_carries_type_tag() {
        let bytes = JoinRequest::new("r1", "alice").encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "join");
    }

    #[test]
    fn decode_rejects_other_types() {
        let result = JoinRequest::decode(br#"{"type":"offer","room_id":"r1","user_id":"alice"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidHandshake(_))));
    }

    #[test]
    fn decode_rejects_empty_ids() {
        let result = JoinRequest::decode(br#"{"type":"join","room_id":"  ","user_id":"alice"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidHandshake(_))));

        let result = JoinRequest::decode(br#"{"type":"join","room_id":"r1","user_id":""}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidHandshake(_))));
    }
}
