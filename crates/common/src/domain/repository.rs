use crate::domain::{DomainResult, Finding, MessageEnvelope, ProcessResponse};
use async_trait::async_trait;

/// Conflict resolution applied when an inserted row hits an existing primary key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnConflict {
    /// Keep the stored row untouched
    DoNothing,
    /// Overwrite `columns` of the stored row with the incoming values
    Update {
        target: Vec<String>,
        columns: Vec<String>,
    },
}

impl OnConflict {
    /// `(toolFindingId) DO UPDATE SET extractDate = EXCLUDED.extractDate`
    pub fn refresh_extract_date() -> Self {
        Self::Update {
            target: vec!["toolFindingId".to_string()],
            columns: vec!["extractDate".to_string()],
        }
    }

    /// Render the clause that follows `ON CONFLICT`
    pub fn to_sql(&self) -> String {
        match self {
            OnConflict::DoNothing => "DO NOTHING".to_string(),
            OnConflict::Update { target, columns } if columns.is_empty() => {
                format!("({}) DO NOTHING", target.join(", "))
            }
            OnConflict::Update { target, columns } => {
                let assignments: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{c} = EXCLUDED.{c}"))
                    .collect();
                format!(
                    "({}) DO UPDATE SET {}",
                    target.join(", "),
                    assignments.join(", ")
                )
            }
        }
    }
}

/// Input for upserting a batch of findings
#[derive(Debug, Clone)]
pub struct UpsertFindingsInput {
    pub table: String,
    pub findings: Vec<Finding>,
    pub on_conflict: OnConflict,
}

/// Repository trait for finding storage.
/// Infrastructure layer (PostgreSQL) implements this trait.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FindingRepository: Send + Sync {
    /// Upsert a batch of findings keyed by `tool_finding_id`.
    /// The batch commits atomically (all-or-nothing).
    /// Returns the number of rows written.
    async fn upsert_findings(&self, input: UpsertFindingsInput) -> DomainResult<u64>;
}

/// Trait for sending envelopes to a named queue.
///
/// Implementations publish exactly once and never retry; the outcome is
/// reported in the returned response.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EnvelopeSender: Send + Sync {
    async fn send_message(&self, envelope: &MessageEnvelope, queue: &str) -> ProcessResponse;
}
