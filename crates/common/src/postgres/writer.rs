use crate::domain::{DomainError, DomainResult, Finding, OnConflict};
use crate::postgres::PostgresClient;
use chrono::NaiveDateTime;
use tokio_postgres::types::ToSql;
use tracing::{debug, info};

/// Columns of the canonical finding row, in storage order
pub const FINDING_COLUMNS: [&str; 11] = [
    "toolName",
    "resourceType",
    "resourceId",
    "toolFindingId",
    "toolFindingSummary",
    "toolFindingJson",
    "toolFindingURL",
    "toolFindingSeverity",
    "voltronSeverity",
    "extractDate",
    "findingDate",
];

/// A row that can be written by [`PostgresWriter`]
pub trait TableRow: Sync {
    /// Column names, in the same order as [`TableRow::params`]
    fn columns() -> &'static [&'static str];

    fn params(&self) -> Vec<&(dyn ToSql + Sync)>;
}

/// Storage form of a [`Finding`]; timestamps are stored without time zone (UTC)
#[derive(Debug, Clone, PartialEq)]
pub struct FindingRow {
    pub tool_name: String,
    pub resource_type: String,
    pub resource_id: String,
    pub tool_finding_id: String,
    pub tool_finding_summary: String,
    pub tool_finding_json: serde_json::Value,
    pub tool_finding_url: String,
    pub tool_finding_severity: String,
    pub voltron_severity: String,
    pub extract_date: NaiveDateTime,
    pub finding_date: NaiveDateTime,
}

impl From<Finding> for FindingRow {
    fn from(finding: Finding) -> Self {
        FindingRow {
            tool_name: finding.tool_name,
            resource_type: finding.resource_type,
            resource_id: finding.resource_id,
            tool_finding_id: finding.tool_finding_id,
            tool_finding_summary: finding.tool_finding_summary,
            tool_finding_json: finding.tool_finding_json,
            tool_finding_url: finding.tool_finding_url,
            tool_finding_severity: finding.tool_finding_severity,
            voltron_severity: finding.voltron_severity,
            extract_date: finding.extract_date.naive_utc(),
            finding_date: finding.finding_date.naive_utc(),
        }
    }
}

impl TableRow for FindingRow {
    fn columns() -> &'static [&'static str] {
        &FINDING_COLUMNS
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.tool_name,
            &self.resource_type,
            &self.resource_id,
            &self.tool_finding_id,
            &self.tool_finding_summary,
            &self.tool_finding_json,
            &self.tool_finding_url,
            &self.tool_finding_severity,
            &self.voltron_severity,
            &self.extract_date,
            &self.finding_date,
        ]
    }
}

/// Check a table name is a plain SQL identifier, optionally schema-qualified.
///
/// Table names are interpolated into statements, so anything else is rejected.
pub fn validate_table_name(table: &str) -> DomainResult<()> {
    let parts: Vec<&str> = table.split('.').collect();
    let valid = parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if valid {
        Ok(())
    } else {
        Err(DomainError::InvalidTableName(table.to_string()))
    }
}

/// Build the parameterized upsert statement for one row of `columns`
pub fn build_upsert_statement(
    table: &str,
    columns: &[&str],
    on_conflict: &OnConflict,
) -> DomainResult<String> {
    validate_table_name(table)?;

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT {}",
        table,
        columns.join(", "),
        placeholders.join(", "),
        on_conflict.to_sql()
    ))
}

/// Idempotent batch writer
#[derive(Clone)]
pub struct PostgresWriter {
    client: PostgresClient,
}

impl PostgresWriter {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    /// Insert `rows` into `table`, resolving primary-key conflicts with
    /// `on_conflict`. The batch commits as one transaction or not at all.
    ///
    /// Returns the number of rows inserted or updated.
    pub async fn upsert<R: TableRow>(
        &self,
        table: &str,
        rows: &[R],
        on_conflict: &OnConflict,
    ) -> DomainResult<u64> {
        let statement = build_upsert_statement(table, R::columns(), on_conflict)?;

        if rows.is_empty() {
            info!(table = %table, "Received 0 rows to write");
            return Ok(0);
        }

        info!(table = %table, rows = rows.len(), "Writing rows");

        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let tx = conn
            .transaction()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let prepared = tx
            .prepare(&statement)
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let mut written = 0;
        for row in rows {
            // An error drops `tx`, which rolls the whole batch back
            written += tx
                .execute(&prepared, &row.params())
                .await
                .map_err(|e| DomainError::RepositoryError(e.into()))?;
        }

        tx.commit()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(table = %table, written, "Committed batch");
        Ok(written)
    }
}
