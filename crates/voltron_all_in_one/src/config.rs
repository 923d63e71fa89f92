use collector::domain::RetryPolicy;
use common::postgres::PostgresConfig;
use common::telemetry::{LogFormat, TelemetryConfig};
use config::{Config, ConfigError, Environment};
use collector::http::{WizCredentials, WIZ_AUTH_URL};
use ingest_worker::handlers::HandlerSettings;
use ingest_worker::ingest_worker::{ConsumerMode, IngestWorkerConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const REDACTED: &str = "<redacted>";

#[derive(Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    // Queue configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Queue the worker consumes envelopes from
    #[serde(default = "default_source_queue")]
    pub source_queue: String,

    /// Queue receiving forwarded findings envelopes
    #[serde(default = "default_destination_queue")]
    pub destination_queue: String,

    /// Durable consumer name on the source queue
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// `async` or `blocking`
    #[serde(default = "default_consumer_mode")]
    pub consumer_mode: String,

    /// How long one receive waits for a message, in seconds
    #[serde(default = "default_receive_wait_secs")]
    pub receive_wait_secs: u64,

    /// Redelivery delay for unacknowledged messages, in seconds; must
    /// exceed `handler_timeout_secs`
    #[serde(default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,

    /// Delivery attempts before the broker gives up on a message
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,

    /// Upper bound for one handler invocation, in seconds
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    /// Table receiving canonical findings
    #[serde(default = "default_findings_table")]
    pub findings_table: String,

    // Collector retry configuration
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,

    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    // Upstream tools; unset disables the handler
    #[serde(default)]
    pub network_events_url: Option<String>,

    /// Enables the Snyk API collector; without it Snyk issues are read
    /// from the envelope
    #[serde(default)]
    pub snyk_api_token: Option<String>,

    #[serde(default)]
    pub snyk_api_url: Option<String>,

    #[serde(default)]
    pub snyk_orgs_url: Option<String>,

    /// Wiz GraphQL endpoint
    #[serde(default)]
    pub wiz_api_url: Option<String>,

    /// Pre-issued bearer token; takes precedence over client credentials
    #[serde(default)]
    pub wiz_api_token: Option<String>,

    #[serde(default)]
    pub wiz_client_id: Option<String>,

    #[serde(default)]
    pub wiz_client_secret: Option<String>,

    #[serde(default = "default_wiz_auth_url")]
    pub wiz_auth_url: String,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = |value: &Option<String>| value.as_ref().map(|_| REDACTED);

        f.debug_struct("ServiceConfig")
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("nats_url", &self.nats_url)
            .field("source_queue", &self.source_queue)
            .field("destination_queue", &self.destination_queue)
            .field("consumer_name", &self.consumer_name)
            .field("consumer_mode", &self.consumer_mode)
            .field("receive_wait_secs", &self.receive_wait_secs)
            .field("ack_wait_secs", &self.ack_wait_secs)
            .field("max_deliver", &self.max_deliver)
            .field("handler_timeout_secs", &self.handler_timeout_secs)
            .field("startup_timeout_secs", &self.startup_timeout_secs)
            .field("postgres_host", &self.postgres_host)
            .field("postgres_port", &self.postgres_port)
            .field("postgres_database", &self.postgres_database)
            .field("postgres_username", &self.postgres_username)
            .field("postgres_password", &REDACTED)
            .field("postgres_max_pool_size", &self.postgres_max_pool_size)
            .field("findings_table", &self.findings_table)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_initial_backoff_ms", &self.retry_initial_backoff_ms)
            .field("retry_max_backoff_ms", &self.retry_max_backoff_ms)
            .field("network_events_url", &self.network_events_url)
            .field("snyk_api_token", &secret(&self.snyk_api_token))
            .field("snyk_api_url", &self.snyk_api_url)
            .field("snyk_orgs_url", &self.snyk_orgs_url)
            .field("wiz_api_url", &self.wiz_api_url)
            .field("wiz_api_token", &secret(&self.wiz_api_token))
            .field("wiz_client_id", &self.wiz_client_id)
            .field("wiz_client_secret", &secret(&self.wiz_client_secret))
            .field("wiz_auth_url", &self.wiz_auth_url)
            .finish()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_source_queue() -> String {
    "voltron".to_string()
}

fn default_destination_queue() -> String {
    "voltron-findings".to_string()
}

fn default_consumer_name() -> String {
    "voltron-ingest".to_string()
}

fn default_consumer_mode() -> String {
    "async".to_string()
}

fn default_receive_wait_secs() -> u64 {
    5
}

fn default_ack_wait_secs() -> u64 {
    600
}

fn default_max_deliver() -> i64 {
    5
}

fn default_handler_timeout_secs() -> u64 {
    300
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "voltron".to_string()
}

fn default_postgres_username() -> String {
    "voltron".to_string()
}

fn default_postgres_password() -> String {
    "voltron".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

fn default_findings_table() -> String {
    "findings".to_string()
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_initial_backoff_ms() -> u64 {
    500
}

fn default_retry_max_backoff_ms() -> u64 {
    30_000
}

fn default_wiz_auth_url() -> String {
    WIZ_AUTH_URL.to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: "voltron-all-in-one".to_string(),
            log_level: self.log_level.clone(),
            format: LogFormat::parse(&self.log_format),
        }
    }

    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_initial_backoff_ms),
            Duration::from_millis(self.retry_max_backoff_ms),
        )
    }

    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            network_events_url: non_empty(&self.network_events_url),
            snyk_api_token: non_empty(&self.snyk_api_token),
            snyk_api_url: non_empty(&self.snyk_api_url),
            snyk_orgs_url: non_empty(&self.snyk_orgs_url),
            wiz_api_url: non_empty(&self.wiz_api_url),
            wiz_credentials: self.wiz_credentials(),
        }
    }

    fn wiz_credentials(&self) -> Option<WizCredentials> {
        if let Some(token) = non_empty(&self.wiz_api_token) {
            return Some(WizCredentials::Token(token));
        }
        match (non_empty(&self.wiz_client_id), non_empty(&self.wiz_client_secret)) {
            (Some(client_id), Some(client_secret)) => Some(WizCredentials::ClientCredentials {
                auth_url: self.wiz_auth_url.clone(),
                client_id,
                client_secret,
            }),
            _ => None,
        }
    }

    pub fn worker(&self) -> anyhow::Result<IngestWorkerConfig> {
        // A redelivery before the handler deadline would run the envelope twice
        if self.ack_wait_secs <= self.handler_timeout_secs {
            anyhow::bail!(
                "ACK_WAIT_SECS ({}) must be greater than HANDLER_TIMEOUT_SECS ({})",
                self.ack_wait_secs,
                self.handler_timeout_secs
            );
        }

        Ok(IngestWorkerConfig {
            source_queue: self.source_queue.clone(),
            consumer_name: self.consumer_name.clone(),
            mode: ConsumerMode::parse(&self.consumer_mode)?,
            receive_wait: Duration::from_secs(self.receive_wait_secs),
            ack_wait: Duration::from_secs(self.ack_wait_secs),
            max_deliver: self.max_deliver,
            handler_timeout: Duration::from_secs(self.handler_timeout_secs),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment is process-global
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "LOG_LEVEL",
        "CONSUMER_MODE",
        "SOURCE_QUEUE",
        "MAX_DELIVER",
        "WIZ_API_URL",
        "WIZ_API_TOKEN",
        "WIZ_CLIENT_ID",
        "WIZ_CLIENT_SECRET",
        "WIZ_AUTH_URL",
        "SNYK_API_TOKEN",
        "NETWORK_EVENTS_URL",
        "ACK_WAIT_SECS",
        "HANDLER_TIMEOUT_SECS",
        "POSTGRES_PASSWORD",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.source_queue, "voltron");
        assert_eq!(config.worker().unwrap().mode, ConsumerMode::Async);
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert!(config.handler_settings().wiz_api_url.is_none());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();
        std::env::set_var("LOG_LEVEL", "debug");
        std::env::set_var("CONSUMER_MODE", "blocking");
        std::env::set_var("SOURCE_QUEUE", "findings-in");
        std::env::set_var("MAX_DELIVER", "9");
        std::env::set_var("WIZ_API_URL", "https://api.wiz.test/graphql");
        std::env::set_var("WIZ_API_TOKEN", "");

        let config = ServiceConfig::from_env().unwrap();
        let worker = config.worker().unwrap();
        let handlers = config.handler_settings();

        assert_eq!(config.log_level, "debug");
        assert_eq!(worker.mode, ConsumerMode::Blocking);
        assert_eq!(worker.source_queue, "findings-in");
        assert_eq!(worker.max_deliver, 9);
        assert_eq!(
            handlers.wiz_api_url.as_deref(),
            Some("https://api.wiz.test/graphql")
        );
        assert!(handlers.wiz_credentials.is_none());

        clear();
    }

    #[test]
    fn test_wiz_client_credentials() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();
        std::env::set_var("WIZ_API_URL", "https://api.wiz.test/graphql");
        std::env::set_var("WIZ_CLIENT_ID", "id-1");
        std::env::set_var("WIZ_CLIENT_SECRET", "s3cret");

        let handlers = ServiceConfig::from_env().unwrap().handler_settings();

        match handlers.wiz_credentials {
            Some(WizCredentials::ClientCredentials {
                auth_url,
                client_id,
                client_secret,
            }) => {
                assert_eq!(auth_url, "https://auth.app.wiz.io");
                assert_eq!(client_id, "id-1");
                assert_eq!(client_secret, "s3cret");
            }
            other => panic!("expected client credentials, got {other:?}"),
        }

        std::env::set_var("WIZ_API_TOKEN", "static");
        let handlers = ServiceConfig::from_env().unwrap().handler_settings();
        assert!(matches!(handlers.wiz_credentials, Some(WizCredentials::Token(_))));

        clear();
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();
        std::env::set_var("POSTGRES_PASSWORD", "pg-secret");
        std::env::set_var("WIZ_API_TOKEN", "wiz-secret");
        std::env::set_var("WIZ_CLIENT_SECRET", "client-secret");
        std::env::set_var("SNYK_API_TOKEN", "snyk-secret");

        let config = ServiceConfig::from_env().unwrap();
        let rendered = format!("{config:?}");

        for secret in ["pg-secret", "wiz-secret", "client-secret", "snyk-secret"] {
            assert!(!rendered.contains(secret), "{secret} leaked: {rendered}");
        }
        assert!(rendered.contains("postgres_password"));
        assert!(rendered.contains("<redacted>"));

        clear();
    }

    #[test]
    fn test_ack_wait_must_exceed_handler_timeout() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();

        let config = ServiceConfig::from_env().unwrap();
        assert!(config.ack_wait_secs > config.handler_timeout_secs);

        std::env::set_var("ACK_WAIT_SECS", "300");
        std::env::set_var("HANDLER_TIMEOUT_SECS", "300");
        let config = ServiceConfig::from_env().unwrap();
        assert!(config.worker().is_err());

        std::env::set_var("ACK_WAIT_SECS", "301");
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.worker().unwrap().ack_wait, Duration::from_secs(301));

        clear();
    }

    #[test]
    fn test_unknown_consumer_mode_is_rejected() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();
        std::env::set_var("CONSUMER_MODE", "threads");

        let config = ServiceConfig::from_env().unwrap();
        assert!(config.worker().is_err());

        clear();
    }
}
