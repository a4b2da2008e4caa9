//! WebSocket message protocol definitions
//!
//! All control messages share one JSON envelope:
//! `{"type": "...", "payload": {...}, "timestamp": 1234567890.123}`.
//! The type set is closed; anything outside it is rejected at decode time and
//! never reaches the dispatcher. Unknown top-level fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ordered payload mapping (`serde_json` built with `preserve_order`).
pub type Payload = serde_json::Map<String, Value>;

/// Closed set of wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Client -> server (commands)
    GetState,
    SetPosition,
    SetVolume,
    SetCarrier,
    SetPulseParams,
    SetVibration,
    SetPattern,
    SetCalibration,
    Play,
    Stop,

    // Server -> client (events)
    StateUpdate,
    PositionUpdate,
    VolumeUpdate,
    PlayStateUpdate,
    CarrierUpdate,
    PulseUpdate,
    PatternUpdate,
    VibrationUpdate,
    Error,
    Connected,
}

impl MessageType {
    /// The wire name of this type (the snake_case serde rename).
    pub fn wire_name(&self) -> String {
        match serde_json::to_value(self) {
            Ok(Value::String(s)) => s,
            _ => format!("{:?}", self),
        }
    }
}

/// Wire message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub msg_type: MessageType,
    pub payload: Payload,
    /// Seconds since the Unix epoch. Informational only, never used for
    /// ordering decisions. Defaults to encode time when absent.
    pub timestamp: f64,
}

/// Errors raised while decoding a wire message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("missing message type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("payload must be a JSON object")]
    InvalidPayload,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(msg_type: MessageType, payload: Payload) -> Self {
        Self {
            msg_type,
            payload,
            timestamp: now_timestamp(),
        }
    }

    /// Create a message with an empty payload.
    pub fn empty(msg_type: MessageType) -> Self {
        Self::new(msg_type, Payload::new())
    }

    /// Create an ERROR message carrying a failure description.
    pub fn error(text: impl Into<String>) -> Self {
        let mut payload = Payload::new();
        payload.insert("error".to_string(), Value::String(text.into()));
        Self::new(MessageType::Error, payload)
    }

    /// Serialize to the JSON wire format. Never fails for well-formed
    /// messages: the envelope is assembled as a `Value` and stringified.
    pub fn encode(&self) -> String {
        let mut envelope = Payload::new();
        envelope.insert(
            "type".to_string(),
            Value::String(self.msg_type.wire_name()),
        );
        envelope.insert("payload".to_string(), Value::Object(self.payload.clone()));
        envelope.insert(
            "timestamp".to_string(),
            serde_json::Number::from_f64(self.timestamp)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        Value::Object(envelope).to_string()
    }

    /// Parse a wire message. Fails on malformed JSON, a missing or unknown
    /// `type`, or a non-object payload.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw)?;
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?;
        let msg_type: MessageType =
            serde_json::from_value(Value::String(type_name.to_string()))
                .map_err(|_| DecodeError::UnknownType(type_name.to_string()))?;

        let payload = match obj.get("payload") {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(DecodeError::InvalidPayload),
        };

        let timestamp = obj
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or_else(now_timestamp);

        Ok(Self {
            msg_type,
            payload,
            timestamp,
        })
    }
}

/// Current time as float seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let mut payload = Payload::new();
        payload.insert("value".to_string(), serde_json::json!(42.0));
        let msg = Message::new(MessageType::SetVolume, payload);

        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.msg_type, MessageType::SetVolume);
        assert_eq!(decoded.payload["value"], serde_json::json!(42.0));
        assert_eq!(decoded.timestamp, msg.timestamp);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = r#"{"type": "reboot", "payload": {}}"#;
        match Message::decode(raw) {
            Err(DecodeError::UnknownType(name)) => assert_eq!(name, "reboot"),
            other => panic!("expected UnknownType, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_type_rejected() {
        assert!(matches!(
            Message::decode(r#"{"payload": {}}"#),
            Err(DecodeError::MissingType)
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            Message::decode("not json at all"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(matches!(
            Message::decode(r#"{"type": "play", "payload": [1, 2]}"#),
            Err(DecodeError::InvalidPayload)
        ));
    }

    #[test]
    fn test_missing_payload_and_timestamp_defaulted() {
        let msg = Message::decode(r#"{"type": "get_state"}"#).unwrap();
        assert_eq!(msg.msg_type, MessageType::GetState);
        assert!(msg.payload.is_empty());
        assert!(msg.timestamp > 0.0);
    }

    #[test]
    fn test_unknown_top_level_fields_ignored() {
        let raw = r#"{"type": "stop", "payload": {}, "extra": true, "v": 2}"#;
        let msg = Message::decode(raw).unwrap();
        assert_eq!(msg.msg_type, MessageType::Stop);
    }

    #[test]
    fn test_wire_names_are_snake_case() {
        assert_eq!(MessageType::GetState.wire_name(), "get_state");
        assert_eq!(MessageType::SetPulseParams.wire_name(), "set_pulse_params");
        assert_eq!(MessageType::PlayStateUpdate.wire_name(), "play_state_update");
    }

    #[test]
    fn test_error_message_payload() {
        let msg = Message::error("boom");
        assert_eq!(msg.msg_type, MessageType::Error);
        assert_eq!(msg.payload["error"], serde_json::json!("boom"));
    }
}
