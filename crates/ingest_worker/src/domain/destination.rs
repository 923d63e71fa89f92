use common::domain::{DomainError, DomainResult};
use serde_json::{Map, Value};
use std::fmt;

/// Where a handler's normalized findings go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Upsert into a relational table
    Table(String),
    /// Forward as one envelope onto a queue
    Queue(String),
}

impl Destination {
    /// Apply the routing keys of an envelope's `handlerConfig` to `default`.
    ///
    /// `output_type: "database"` requires `dst_db_table`; `output_type:
    /// "queue"` (or `"rabbitmq"`) requires `dst_queue_name`. Without an
    /// `output_type` the default stands.
    pub fn resolve(default: &Destination, handler_config: &Map<String, Value>) -> DomainResult<Self> {
        let Some(output_type) = handler_config.get("output_type") else {
            return Ok(default.clone());
        };

        match output_type.as_str() {
            Some("database") => required(handler_config, "dst_db_table").map(Destination::Table),
            Some("queue") | Some("rabbitmq") => {
                required(handler_config, "dst_queue_name").map(Destination::Queue)
            }
            _ => Err(DomainError::InvalidDestination(format!(
                "unsupported output_type {output_type}"
            ))),
        }
    }
}

fn required(config: &Map<String, Value>, key: &str) -> DomainResult<String> {
    match config.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(DomainError::InvalidDestination(format!("{key} is required"))),
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Table(name) => write!(f, "table:{name}"),
            Destination::Queue(name) => write!(f, "queue:{name}"),
        }
    }
}
