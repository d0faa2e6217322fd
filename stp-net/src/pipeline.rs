//! Serialization, length validation and ping/pong filtering shared by the send and receive
//! paths. Generalizes `ZStack.serializeMsg`/`deserializeMsg`/`handlePingPong`
//! (`original_source/stp_zmq/zstack.py`) into small, independently testable functions.

use serde_json::Value;
use stp_core::error::{StackError, StackResult};

/// Health-probe payloads. Subject to the same send path as application messages but exempt
/// from the "remote not connected" warning and never forwarded to the message handler.
pub const PING: &str = "pi";
pub const PONG: &str = "po";

#[inline]
pub fn is_health_message(bytes: &[u8]) -> bool {
    bytes == PING.as_bytes() || bytes == PONG.as_bytes()
}

/// What a caller hands to `Stack::send`. Mirrors the three forms `ZStack.serializeMsg`
/// accepted: a JSON-representable mapping, a string, or raw bytes.
pub enum Payload<'a> {
    Json(&'a Value),
    Text(&'a str),
    Bytes(&'a [u8]),
}

/// Serializes `payload` and enforces `limit` in one step, exactly as `prepare_to_send` did.
pub fn serialize(payload: Payload, limit: usize) -> StackResult<Vec<u8>> {
    let bytes = match payload {
        Payload::Json(value) => {
            serde_json::to_vec(value).map_err(|err| StackError::JsonDecode(err.to_string()))?
        }
        Payload::Text(text) => text.as_bytes().to_vec(),
        Payload::Bytes(bytes) => bytes.to_vec(),
    };
    validate_len(&bytes, limit)?;
    Ok(bytes)
}

/// Enforces the payload byte cap without touching the bytes.
pub fn validate_len(bytes: &[u8], limit: usize) -> StackResult<()> {
    if bytes.len() > limit {
        Err(StackError::MessageTooLarge { len: bytes.len(), limit })
    } else {
        Ok(())
    }
}

/// Decodes a drained frame to text, failing with `Utf8Decode` rather than panicking.
pub fn decode_text(bytes: &[u8]) -> StackResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| StackError::Utf8Decode)
}

/// Parses surviving, decoded text as a JSON application message.
pub fn deserialize_json(text: &str) -> StackResult<Value> {
    serde_json::from_str(text).map_err(|err| StackError::JsonDecode(err.to_string()))
}

/// Dispatch target for an outbound ping/pong. A tagged variant instead of accepting either a
/// name or a live `Remote` reference dynamically, per the redesign in SPEC_FULL.md 9: a known
/// remote is addressed by name (the stack looks its socket up), an inbound peer the stack
/// never registered a `Remote` for is addressed by its raw listener identity.
pub enum PingTarget {
    Name(String),
    Identity(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_json_round_trips_through_deserialize() {
        let value = json!({"x": 1, "y": "two"});
        let bytes = serialize(Payload::Json(&value), 1024).unwrap();
        let text = decode_text(&bytes).unwrap();
        let decoded = deserialize_json(&text).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn serialize_rejects_oversize_payload() {
        let value = json!({"data": "x".repeat(200)});
        let err = serialize(Payload::Json(&value), 64).unwrap_err();
        assert!(matches!(err, StackError::MessageTooLarge { .. }));
    }

    #[test]
    fn health_messages_are_recognized() {
        assert!(is_health_message(PING.as_bytes()));
        assert!(is_health_message(PONG.as_bytes()));
        assert!(!is_health_message(b"{}"));
    }

    #[test]
    fn decode_text_rejects_invalid_utf8() {
        let bytes = vec![0xff, 0xfe, 0xfd];
        assert!(matches!(decode_text(&bytes), Err(StackError::Utf8Decode)));
    }
}
