use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Uniform result of every queue operation (send, receive-and-process).
///
/// `success` drives acknowledgment: a consumed message is acknowledged only
/// when the processing response reports success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ProcessResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
