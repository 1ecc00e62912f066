//! MessageEnvelope - the JSON wrapper that goes on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DispatchError;
use super::ids::MessageId;

/// Identity, type, timestamp, sender and opaque body of one message.
///
/// Field names follow the wire format consumers already parse
/// (`message_created_time`, `sentby`, `message_body`, `message_ack`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_id: MessageId,
    pub message_type: String,
    #[serde(rename = "message_created_time")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "sentby")]
    pub sent_by: String,
    #[serde(rename = "message_body")]
    pub body: serde_json::Value,
    #[serde(rename = "message_ack")]
    pub ack_requested: bool,
}

impl MessageEnvelope {
    /// Build an envelope, converting the caller's body to a JSON value.
    ///
    /// Fails with `Serialization` if `body` cannot be represented as JSON.
    /// Non-finite floats (NaN, ±inf) are not an error: `serde_json` writes
    /// them as `null`, so consumers see `null` in their place.
    pub fn with_body<B: Serialize + ?Sized>(
        message_id: MessageId,
        message_type: impl Into<String>,
        created_at: DateTime<Utc>,
        sent_by: impl Into<String>,
        body: &B,
        ack_requested: bool,
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            message_id,
            message_type: message_type.into(),
            created_at,
            sent_by: sent_by.into(),
            body: serde_json::to_value(body)?,
            ack_requested,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, DispatchError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Same bytes as `encode`, as the text stored in `Task::payload`.
    pub fn encode_to_string(&self) -> Result<String, DispatchError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DispatchError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode the opaque body into a caller type.
    pub fn body_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, DispatchError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Unencodable;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeMap;
    use ulid::Ulid;

    fn sample() -> MessageEnvelope {
        MessageEnvelope::with_body(
            MessageId::from_ulid(Ulid::new()),
            "test-type",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            "test-node",
            &json!({ "key1": "value1", "key2": 123 }),
            true,
        )
        .unwrap()
    }

    #[test]
    fn wire_field_names() {
        let bytes = sample().encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let object = value.as_object().unwrap();

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "message_ack",
                "message_body",
                "message_created_time",
                "message_id",
                "message_type",
                "sentby",
            ]
        );
        assert_eq!(object["message_created_time"], "2024-01-01T12:00:00Z");
        assert!(object["message_id"].as_str().unwrap().starts_with("msg-"));
    }

    #[test]
    fn decode_restores_identity_fields() {
        let original = sample();
        let decoded = MessageEnvelope::decode(&original.encode().unwrap()).unwrap();

        assert_eq!(decoded.message_id, original.message_id);
        assert_eq!(decoded.message_type, "test-type");
        assert_eq!(decoded.sent_by, "test-node");
        assert!(decoded.ack_requested);
        assert_eq!(decoded.created_at, original.created_at);
        assert_eq!(decoded.body["key1"], "value1");
        assert_eq!(decoded.body["key2"].as_f64(), Some(123.0));
    }

    #[test]
    fn typed_body_access() {
        #[derive(Deserialize)]
        struct Body {
            key1: String,
            key2: u32,
        }
        let body: Body = sample().body_as().unwrap();
        assert_eq!(body.key1, "value1");
        assert_eq!(body.key2, 123);
    }

    #[test]
    fn unencodable_body_is_a_serialization_error() {
        let err = MessageEnvelope::with_body(
            MessageId::from_ulid(Ulid::new()),
            "bad",
            Utc::now(),
            "node",
            &Unencodable,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Serialization(_)));
    }

    #[test]
    fn non_finite_floats_become_null() {
        let envelope = MessageEnvelope::with_body(
            MessageId::from_ulid(Ulid::new()),
            "metrics",
            Utc::now(),
            "node",
            &BTreeMap::from([("ratio", f64::NAN), ("ceiling", f64::INFINITY), ("ok", 1.5)]),
            false,
        )
        .unwrap();

        let decoded = MessageEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert!(decoded.body["ratio"].is_null());
        assert!(decoded.body["ceiling"].is_null());
        assert_eq!(decoded.body["ok"].as_f64(), Some(1.5));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = MessageEnvelope::decode(b"{\"message_id\": 7}").unwrap_err();
        assert!(matches!(err, DispatchError::Serialization(_)));
    }
}
