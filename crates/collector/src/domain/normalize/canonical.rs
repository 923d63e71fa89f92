use super::{parse_schema, NormalizeError};
use chrono::{DateTime, Utc};
use common::domain::Finding;
use serde_json::Value;

pub(super) const TOOL_NAME: &str = "VoltronFindings";

/// Accept a serialized [`Finding`] as-is, restamping `extract_date`
pub(super) fn normalize(raw: &Value, extract_date: DateTime<Utc>) -> Result<Finding, NormalizeError> {
    let mut finding: Finding = parse_schema(TOOL_NAME, raw)?;
    finding.extract_date = extract_date;
    Ok(finding)
}
