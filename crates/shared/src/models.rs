//! Wire envelope and frame types exchanged over the realtime socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

// --- WebSocket ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> WsEnvelope<T> {
    /// Wrap a payload in a fresh envelope.
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            ts: Utc::now(),
            correlation_id: None,
        }
    }

    /// Wrap a payload answering the envelope with id `correlation_id`.
    pub fn reply_to(correlation_id: impl Into<String>, payload: T) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::new(payload)
        }
    }
}

/// A single frame on the socket, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Frame {
    /// A named application event.
    Event {
        name: String,
        #[serde(default)]
        payload: Value,
        /// The sender expects an `Ack` carrying this envelope's id.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        wants_ack: bool,
    },
    /// Acknowledgment of an earlier event; correlated through the envelope.
    Ack {
        #[serde(default)]
        payload: Value,
    },
}

impl Frame {
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Frame::Event {
            name: name.into(),
            payload,
            wants_ack: false,
        }
    }

    pub fn request(name: impl Into<String>, payload: Value) -> Self {
        Frame::Event {
            name: name.into(),
            payload,
            wants_ack: true,
        }
    }

    pub fn ack(payload: Value) -> Self {
        Frame::Ack { payload }
    }
}

pub type FrameEnvelope = WsEnvelope<Frame>;

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<FrameEnvelope, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode one envelope as a text frame.
pub fn encode_frame(envelope: &FrameEnvelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Application error carried in an acknowledgment payload, if any.
///
/// Accepts `{"error": "text"}` as well as `{"error": {"message": "text"}}`.
/// `null` and `false` mean no error.
pub fn ack_error(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(fields) => Some(
            fields
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(fields.clone()).to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Payload of a subscribe acknowledgment: `{ "data": <snapshot> }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SnapshotAck {
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_frame_wire_shape() {
        let env = WsEnvelope {
            id: "e1".to_string(),
            payload: Frame::request("child:subscribe", json!({})),
            ts: "2026-01-05T08:00:00Z".parse().unwrap(),
            correlation_id: None,
        };
        let value: Value = serde_json::from_str(&encode_frame(&env).unwrap()).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["data"]["name"], "child:subscribe");
        assert_eq!(value["data"]["wants_ack"], true);
        assert!(value.get("correlationId").is_none());
    }

    #[test]
    fn ack_frame_decodes_with_correlation() {
        let text = r#"{"id":"a1","type":"ack","data":{"payload":{"data":[1,2]}},"ts":"2026-01-05T08:00:00Z","correlationId":"e1"}"#;
        let env = decode_frame(text).unwrap();
        assert_eq!(env.correlation_id.as_deref(), Some("e1"));
        assert_eq!(env.payload, Frame::ack(json!({"data": [1, 2]})));
    }

    #[test]
    fn fire_and_forget_omits_ack_flag() {
        let env = WsEnvelope::new(Frame::event("child:unsubscribe", Value::Null));
        let text = encode_frame(&env).unwrap();
        assert!(!text.contains("wants_ack"));
        let back = decode_frame(&text).unwrap();
        assert_eq!(back.payload, env.payload);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame(r#"{"id":"x","type":"bogus","ts":"2026-01-05T08:00:00Z"}"#).is_err());
    }

    #[test]
    fn ack_error_shapes() {
        assert_eq!(ack_error(&json!({"data": []})), None);
        assert_eq!(ack_error(&json!({"error": null})), None);
        assert_eq!(ack_error(&json!({"error": "denied"})).as_deref(), Some("denied"));
        assert_eq!(
            ack_error(&json!({"error": {"message": "no such group"}})).as_deref(),
            Some("no such group")
        );
        assert_eq!(ack_error(&json!("plain")), None);
    }
}
