use super::{escalate, parse_schema, EscalationRule, NormalizeError};
use chrono::{DateTime, Utc};
use common::domain::{content_hash_id, Finding};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

pub(super) const TOOL_NAME: &str = "TotallyLegitSiteNetConns";
const NOT_SET: &str = "NotSet";

#[derive(Debug, Deserialize)]
struct NetworkConnectionEvent {
    source: String,
    destination: String,
    #[allow(dead_code)]
    port: u64,
    /// Epoch seconds
    time: i64,
    #[serde(default)]
    severity: Option<String>,
}

pub(super) fn normalize(
    raw: &Value,
    rules: &[EscalationRule],
    extract_date: DateTime<Utc>,
) -> Result<Finding, NormalizeError> {
    let event: NetworkConnectionEvent = parse_schema(TOOL_NAME, raw)?;

    let finding_date = DateTime::<Utc>::from_timestamp(event.time, 0).ok_or_else(|| {
        NormalizeError::InvalidTimestamp {
            field: "time",
            value: event.time.to_string(),
        }
    })?;

    let native_severity = event.severity.unwrap_or_else(|| NOT_SET.to_string());
    let voltron_severity = escalate(rules, raw, &native_severity);
    if voltron_severity != native_severity {
        info!(
            source = %event.source,
            destination = %event.destination,
            severity = %voltron_severity,
            "escalated network connection severity"
        );
    }

    Ok(Finding {
        tool_name: TOOL_NAME.to_string(),
        resource_type: "host".to_string(),
        resource_id: event.source.clone(),
        tool_finding_id: content_hash_id(raw),
        tool_finding_summary: format!(
            "Suspicious network connection from {} to {}",
            event.source, event.destination
        ),
        tool_finding_json: raw.clone(),
        tool_finding_url: NOT_SET.to_string(),
        tool_finding_severity: native_severity,
        voltron_severity,
        extract_date,
        finding_date,
    })
}

#[cfg(test)]
mod tests {
    use super::super::Normalizer;
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn payload(port: u64) -> Value {
        json!({"source": "10.0.0.1", "destination": "10.0.0.2", "port": port, "time": 1688821684})
    }

    #[test]
    fn test_rdp_port_escalates_to_high() {
        let finding = Normalizer::network_connection()
            .normalize(&payload(3389), Utc::now())
            .unwrap();

        assert_eq!(finding.voltron_severity, "High");
        assert_eq!(finding.tool_finding_severity, "NotSet");
    }

    #[test]
    fn test_escalation_ignores_native_severity() {
        let mut raw = payload(3389);
        raw["severity"] = json!("Low");

        let finding = Normalizer::network_connection()
            .normalize(&raw, Utc::now())
            .unwrap();

        assert_eq!(finding.tool_finding_severity, "Low");
        assert_eq!(finding.voltron_severity, "High");
    }

    #[test]
    fn test_other_port_stays_not_set() {
        let finding = Normalizer::network_connection()
            .normalize(&payload(80), Utc::now())
            .unwrap();

        assert_eq!(finding.voltron_severity, "NotSet");
    }

    #[test]
    fn test_canonical_fields() {
        let extracted = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let raw = payload(22);

        let finding = Normalizer::network_connection()
            .normalize(&raw, extracted)
            .unwrap();

        assert_eq!(finding.tool_name, "TotallyLegitSiteNetConns");
        assert_eq!(finding.resource_type, "host");
        assert_eq!(finding.resource_id, "10.0.0.1");
        assert_eq!(
            finding.tool_finding_summary,
            "Suspicious network connection from 10.0.0.1 to 10.0.0.2"
        );
        assert_eq!(finding.tool_finding_id, content_hash_id(&raw));
        assert_eq!(finding.tool_finding_json, raw);
        assert_eq!(finding.tool_finding_url, "NotSet");
        assert_eq!(finding.extract_date, extracted);
        assert_eq!(finding.finding_date.timestamp(), 1688821684);
    }

    #[test]
    fn test_identity_changes_with_any_field() {
        let normalizer = Normalizer::network_connection();
        let a = normalizer.normalize(&payload(22), Utc::now()).unwrap();
        let b = normalizer.normalize(&payload(22), Utc::now()).unwrap();
        let c = normalizer.normalize(&payload(23), Utc::now()).unwrap();

        assert_eq!(a.tool_finding_id, b.tool_finding_id);
        assert_ne!(a.tool_finding_id, c.tool_finding_id);
    }

    #[test]
    fn test_missing_port_is_rejected() {
        let raw = json!({"source": "10.0.0.1", "destination": "10.0.0.2", "time": 1});
        let result = Normalizer::network_connection().normalize(&raw, Utc::now());
        assert!(matches!(result, Err(NormalizeError::Schema { .. })));
    }
}
