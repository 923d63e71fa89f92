mod canonical;
mod escalation;
mod network;
mod snyk;
mod wiz;

pub use escalation::*;

use chrono::{DateTime, Utc};
use common::domain::Finding;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("payload does not match the {tool} schema: {source}")]
    Schema {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid timestamp in field {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// One source tool's mapping from raw payload to [`Finding`]
#[derive(Debug, Clone, PartialEq)]
pub enum Normalizer {
    /// Generic network-connection events
    NetworkConnection { escalation: Vec<EscalationRule> },
    /// Static code analysis issues
    SnykCode,
    /// Cloud posture issues
    Wiz,
    /// Findings already in canonical shape, e.g. forwarded between queues
    Canonical,
}

/// Item of a batch that failed to normalize
#[derive(Debug)]
pub struct RejectedItem {
    pub index: usize,
    pub error: NormalizeError,
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub findings: Vec<Finding>,
    pub rejected: Vec<RejectedItem>,
}

impl Normalizer {
    /// Network-connection normalizer with the remote-desktop escalation rule
    pub fn network_connection() -> Self {
        Normalizer::NetworkConnection {
            escalation: vec![EscalationRule::remote_desktop()],
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Normalizer::NetworkConnection { .. } => network::TOOL_NAME,
            Normalizer::SnykCode => snyk::TOOL_NAME,
            Normalizer::Wiz => wiz::TOOL_NAME,
            Normalizer::Canonical => canonical::TOOL_NAME,
        }
    }

    /// Map one raw payload. `extract_date` is the processing time.
    pub fn normalize(
        &self,
        raw: &Value,
        extract_date: DateTime<Utc>,
    ) -> Result<Finding, NormalizeError> {
        match self {
            Normalizer::NetworkConnection { escalation } => {
                network::normalize(raw, escalation, extract_date)
            }
            Normalizer::SnykCode => snyk::normalize(raw, extract_date),
            Normalizer::Wiz => wiz::normalize(raw, extract_date),
            Normalizer::Canonical => canonical::normalize(raw, extract_date),
        }
    }

    /// Map every item; failures are collected per item and never abort siblings
    pub fn normalize_batch(&self, raw: &[Value], extract_date: DateTime<Utc>) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for (index, item) in raw.iter().enumerate() {
            match self.normalize(item, extract_date) {
                Ok(finding) => batch.findings.push(finding),
                Err(error) => {
                    warn!(
                        tool = self.tool_name(),
                        index,
                        error = %error,
                        "skipping item that failed to normalize"
                    );
                    batch.rejected.push(RejectedItem { index, error });
                }
            }
        }
        batch
    }
}

fn parse_schema<T: serde::de::DeserializeOwned>(
    tool: &'static str,
    raw: &Value,
) -> Result<T, NormalizeError> {
    T::deserialize(raw).map_err(|source| NormalizeError::Schema { tool, source })
}
