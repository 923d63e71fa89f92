use crate::domain::result::{DomainError, DomainResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Queue-carried unit of work.
///
/// The wire form is a JSON object with exactly these five camelCase keys.
/// Every key is required; a payload missing any of them is rejected by
/// [`MessageEnvelope::from_wire`] as a malformed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Selects the dispatcher handler that processes this message
    pub handler_name: String,
    /// Handler-specific parameters (destination table/queue, query overrides)
    pub handler_config: Map<String, Value>,
    /// Payload data relevant to the handler
    pub handler_data: Map<String, Value>,
    /// Provenance tag (manual, producer name)
    pub message_source: String,
    /// Epoch seconds when the envelope was created
    pub start_time: i64,
}

impl MessageEnvelope {
    pub fn new(
        handler_name: impl Into<String>,
        handler_config: Map<String, Value>,
        handler_data: Map<String, Value>,
        message_source: impl Into<String>,
        start_time: i64,
    ) -> Self {
        Self {
            handler_name: handler_name.into(),
            handler_config,
            handler_data,
            message_source: message_source.into(),
            start_time,
        }
    }

    /// Serialize the envelope to its JSON wire form
    pub fn to_wire(&self) -> DomainResult<Bytes> {
        let body = serde_json::to_vec(self)
            .map_err(|e| DomainError::MalformedMessage(format!("failed to encode envelope: {e}")))?;
        Ok(Bytes::from(body))
    }

    /// Parse an envelope from its JSON wire form
    pub fn from_wire(payload: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(payload).map_err(|e| DomainError::MalformedMessage(e.to_string()))
    }

    /// Look up a string value in `handler_config`
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.handler_config.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_envelope() -> MessageEnvelope {
        let mut data = Map::new();
        data.insert("data".to_string(), json!("abc"));
        MessageEnvelope::new("X", Map::new(), data, "manual", 1688821684)
    }

    #[test]
    fn test_wire_round_trip_preserves_every_field() {
        let mut envelope = sample_envelope();
        envelope
            .handler_config
            .insert("dst_db_table".to_string(), json!("voltron_findings"));

        let wire = envelope.to_wire().unwrap();
        let decoded = MessageEnvelope::from_wire(&wire).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_wire_uses_camel_case_keys() {
        let wire = sample_envelope().to_wire().unwrap();
        let value: Value = serde_json::from_slice(&wire).unwrap();

        assert_eq!(
            value,
            json!({
                "handlerName": "X",
                "handlerConfig": {},
                "handlerData": {"data": "abc"},
                "messageSource": "manual",
                "startTime": 1688821684
            })
        );
    }

    #[test]
    fn test_missing_field_is_malformed_message() {
        let payload = br#"{"handlerName":"X","handlerConfig":{},"handlerData":{},"messageSource":"manual"}"#;

        let result = MessageEnvelope::from_wire(payload);

        match result {
            Err(DomainError::MalformedMessage(reason)) => assert!(reason.contains("startTime")),
            other => panic!("expected MalformedMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_non_json_payload_is_malformed_message() {
        let result = MessageEnvelope::from_wire(b"not json");
        assert!(matches!(result, Err(DomainError::MalformedMessage(_))));
    }

    #[test]
    fn test_config_str() {
        let mut envelope = sample_envelope();
        envelope
            .handler_config
            .insert("output_type".to_string(), json!("database"));
        envelope.handler_config.insert("limit".to_string(), json!(5));

        assert_eq!(envelope.config_str("output_type"), Some("database"));
        assert_eq!(envelope.config_str("limit"), None);
        assert_eq!(envelope.config_str("missing"), None);
    }
}
