use crate::domain::{DomainResult, Finding, FindingRepository, UpsertFindingsInput};
use crate::postgres::{FindingRow, PostgresClient, PostgresWriter};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Collapse findings sharing a `tool_finding_id` to the last occurrence,
/// keeping the position of the first one.
pub fn dedupe_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Finding> = Vec::with_capacity(findings.len());

    for finding in findings {
        match positions.get(&finding.tool_finding_id) {
            Some(&index) => unique[index] = finding,
            None => {
                positions.insert(finding.tool_finding_id.clone(), unique.len());
                unique.push(finding);
            }
        }
    }

    unique
}

#[derive(Clone)]
pub struct PostgresFindingRepository {
    writer: PostgresWriter,
}

impl PostgresFindingRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self {
            writer: PostgresWriter::new(client),
        }
    }
}

#[async_trait]
impl FindingRepository for PostgresFindingRepository {
    async fn upsert_findings(&self, input: UpsertFindingsInput) -> DomainResult<u64> {
        let received = input.findings.len();
        let rows: Vec<FindingRow> = dedupe_findings(input.findings)
            .into_iter()
            .map(FindingRow::from)
            .collect();

        debug!(
            table = %input.table,
            received,
            unique = rows.len(),
            "Upserting findings"
        );

        self.writer
            .upsert(&input.table, &rows, &input.on_conflict)
            .await
    }
}
