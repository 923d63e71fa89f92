use crate::domain::Destination;
use collector::domain::{Collector, Normalizer};
use std::collections::HashMap;
use std::sync::Arc;

/// What runs for one `handlerName`
#[derive(Clone)]
pub struct Handler {
    pub collector: Arc<dyn Collector>,
    pub normalizer: Normalizer,
    pub destination: Destination,
}

impl Handler {
    pub fn new(collector: Arc<dyn Collector>, normalizer: Normalizer, destination: Destination) -> Self {
        Self {
            collector,
            normalizer,
            destination,
        }
    }
}

/// Handlers by name
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous registration
    pub fn register(&mut self, name: impl Into<String>, handler: Handler) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.register(name, handler);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector::domain::MockCollector;

    fn handler(table: &str) -> Handler {
        Handler::new(
            Arc::new(MockCollector::new()),
            Normalizer::Wiz,
            Destination::Table(table.to_string()),
        )
    }

    #[test]
    fn test_resolve_registered_handler() {
        let registry = HandlerRegistry::new()
            .with_handler("WizIssues", handler("A"))
            .with_handler("Other", handler("B"));

        let resolved = registry.resolve("WizIssues").unwrap();
        assert_eq!(resolved.destination, Destination::Table("A".into()));
        assert!(registry.resolve("Missing").is_none());
        assert_eq!(registry.names(), vec!["Other", "WizIssues"]);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register("X", handler("first"));
        registry.register("X", handler("second"));

        assert_eq!(
            registry.resolve("X").unwrap().destination,
            Destination::Table("second".into())
        );
    }
}
