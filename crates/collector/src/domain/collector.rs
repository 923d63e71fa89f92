use crate::domain::CollectorError;
use async_trait::async_trait;
use common::domain::MessageEnvelope;
use serde_json::Value;
use tracing::debug;

/// Fetches the raw items a handler normalizes
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, envelope: &MessageEnvelope) -> Result<Vec<Value>, CollectorError>;
}

/// Collector for items carried inside the envelope itself, under
/// `handlerData.<key>`.
///
/// A missing key yields no items; a present key that is not an array is a
/// configuration error.
#[derive(Debug, Clone)]
pub struct InlineCollector {
    key: String,
}

impl InlineCollector {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl Collector for InlineCollector {
    async fn collect(&self, envelope: &MessageEnvelope) -> Result<Vec<Value>, CollectorError> {
        match envelope.handler_data.get(&self.key) {
            None => {
                debug!(key = %self.key, "no inline items in envelope");
                Ok(Vec::new())
            }
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(CollectorError::InvalidConfig(format!(
                "handlerData.{} must be an array",
                self.key
            ))),
        }
    }
}
