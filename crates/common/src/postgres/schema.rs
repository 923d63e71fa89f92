use crate::postgres::{validate_table_name, PostgresClient};
use anyhow::{Context, Result};
use tracing::info;

/// `CREATE TABLE IF NOT EXISTS` statement for the canonical finding row
pub fn findings_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            toolName TEXT,
            resourceType TEXT,
            resourceId TEXT,
            toolFindingId TEXT PRIMARY KEY,
            toolFindingSummary TEXT,
            toolFindingJson JSONB,
            toolFindingURL TEXT,
            toolFindingSeverity TEXT,
            voltronSeverity TEXT,
            extractDate TIMESTAMP WITHOUT TIME ZONE,
            findingDate TIMESTAMP WITHOUT TIME ZONE
        )"
    )
}

/// Create the findings table when it does not exist yet
pub async fn ensure_findings_table(client: &PostgresClient, table: &str) -> Result<()> {
    validate_table_name(table)?;

    let conn = client.get_connection().await?;
    conn.batch_execute(&findings_table_ddl(table))
        .await
        .with_context(|| format!("failed to create table {table}"))?;

    info!(table = %table, "findings table ready");
    Ok(())
}
