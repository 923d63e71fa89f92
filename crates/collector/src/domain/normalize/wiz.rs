use super::{parse_schema, NormalizeError};
use chrono::{DateTime, NaiveDateTime, Utc};
use common::domain::{finding_identity, Finding};
use serde::Deserialize;
use serde_json::Value;

pub(super) const TOOL_NAME: &str = "Wiz";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WizIssue {
    #[serde(default)]
    id: Option<String>,
    control: WizControl,
    severity: String,
    created_at: String,
    entity_snapshot: WizEntitySnapshot,
}

#[derive(Debug, Deserialize)]
struct WizControl {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WizEntitySnapshot {
    #[serde(rename = "type")]
    kind: String,
    external_id: String,
}

pub(super) fn normalize(raw: &Value, extract_date: DateTime<Utc>) -> Result<Finding, NormalizeError> {
    let issue: WizIssue = parse_schema(TOOL_NAME, raw)?;
    let finding_date = parse_created_at(&issue.created_at)?;
    let id = finding_identity(issue.id.as_deref(), raw);

    Ok(Finding {
        tool_name: TOOL_NAME.to_string(),
        resource_type: issue.entity_snapshot.kind,
        resource_id: issue.entity_snapshot.external_id,
        tool_finding_url: format!("https://app.wiz.io/issues#~(issue~'{id})"),
        tool_finding_id: id,
        tool_finding_summary: issue.control.name,
        tool_finding_json: raw.clone(),
        tool_finding_severity: issue.severity.clone(),
        voltron_severity: issue.severity,
        extract_date,
        finding_date,
    })
}

/// Wiz timestamps look like `2023-07-08T13:08:04.123Z`; offset-less values are UTC
fn parse_created_at(value: &str) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .map_err(|_| NormalizeError::InvalidTimestamp {
            field: "createdAt",
            value: value.to_string(),
        })
}
