use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Epoch seconds of the "unknown date" sentinel, 1969-04-20T16:20:00Z
const UNKNOWN_FINDING_DATE_SECS: i64 = -22_059_600;

/// Canonical record of a single security issue reported by a source tool.
///
/// `tool_finding_id` is the storage primary key: two findings with the same
/// id overwrite each other instead of producing duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub tool_name: String,
    pub resource_type: String,
    pub resource_id: String,
    pub tool_finding_id: String,
    pub tool_finding_summary: String,
    /// Full raw payload, preserved for audit. Serialized as a JSON value;
    /// a payload that arrives as a serialized JSON string is parsed back.
    #[serde(deserialize_with = "raw_payload")]
    pub tool_finding_json: Value,
    #[serde(rename = "toolFindingURL")]
    pub tool_finding_url: String,
    pub tool_finding_severity: String,
    pub voltron_severity: String,
    /// Processing time
    pub extract_date: DateTime<Utc>,
    /// Source event time, or [`unknown_finding_date`] when the tool has none
    pub finding_date: DateTime<Utc>,
}

fn raw_payload<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::String(text) => Ok(serde_json::from_str(text).unwrap_or(value)),
        _ => Ok(value),
    }
}

/// Sentinel used as `finding_date` when the source tool provides no event time.
pub fn unknown_finding_date() -> DateTime<Utc> {
    Utc.timestamp_opt(UNKNOWN_FINDING_DATE_SECS, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Serialize a JSON value with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 (hex) of the canonical serialization of `payload`
pub fn content_hash_id(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Identity of a finding: the tool's native id when it has a usable one,
/// otherwise the content hash of the raw payload.
pub fn finding_identity(native_id: Option<&str>, payload: &Value) -> String {
    match native_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => content_hash_id(payload),
    }
}
