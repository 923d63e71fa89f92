use super::{parse_schema, NormalizeError};
use chrono::{DateTime, Utc};
use common::domain::{finding_identity, unknown_finding_date, Finding};
use serde::Deserialize;
use serde_json::Value;

pub(super) const TOOL_NAME: &str = "SnykCode";

/// A Snyk Code issue decorated with its project and title
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnykCodeIssue {
    #[serde(default)]
    id: Option<String>,
    repo_name: String,
    long_title: String,
    issue_link: String,
    severity: String,
}

pub(super) fn normalize(raw: &Value, extract_date: DateTime<Utc>) -> Result<Finding, NormalizeError> {
    let issue: SnykCodeIssue = parse_schema(TOOL_NAME, raw)?;

    Ok(Finding {
        tool_name: TOOL_NAME.to_string(),
        resource_type: "CodeRepo".to_string(),
        resource_id: issue.repo_name,
        tool_finding_id: finding_identity(issue.id.as_deref(), raw),
        tool_finding_summary: issue.long_title,
        tool_finding_json: raw.clone(),
        tool_finding_url: issue.issue_link,
        tool_finding_severity: issue.severity.clone(),
        voltron_severity: issue.severity,
        extract_date,
        // Snyk Code issues carry no event time
        finding_date: unknown_finding_date(),
    })
}
