use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Severity override: when the value at `pointer` (RFC 6901) equals
/// `equals`, the normalized severity becomes `severity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub pointer: String,
    pub equals: Value,
    pub severity: String,
}

impl EscalationRule {
    pub fn new(pointer: impl Into<String>, equals: Value, severity: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            equals,
            severity: severity.into(),
        }
    }

    /// Connections to the RDP port are escalated to `High`
    pub fn remote_desktop() -> Self {
        Self::new("/port", json!(3389), "High")
    }

    pub fn matches(&self, payload: &Value) -> bool {
        payload.pointer(&self.pointer) == Some(&self.equals)
    }
}

/// Severity of `payload` after applying `rules`; the first matching rule
/// wins and `native` is kept when none match.
pub fn escalate(rules: &[EscalationRule], payload: &Value, native: &str) -> String {
    rules
        .iter()
        .find(|rule| rule.matches(payload))
        .map(|rule| rule.severity.clone())
        .unwrap_or_else(|| native.to_string())
}
