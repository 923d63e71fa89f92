//! Handlers for the supported source tools.

use crate::domain::{Destination, Handler, HandlerRegistry, FORWARDED_FINDINGS_HANDLER};
use collector::domain::{CollectorError, InlineCollector, Normalizer, RetryPolicy};
use collector::http::{RestCollector, SnykCodeCollector, WizCollector, WizCredentials};
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub const NETWORK_EVENTS_HANDLER: &str = "TotallyLegitSiteQueryHandler";
pub const SNYK_CODE_HANDLER: &str = "SnykCodeIssues";
pub const WIZ_ISSUES_HANDLER: &str = "WizIssues";

/// Upstream endpoints and credentials; a `None` leaves that handler
/// unregistered or, for Snyk, falls back to issues carried in the envelope
#[derive(Clone, Default)]
pub struct HandlerSettings {
    pub network_events_url: Option<String>,
    pub snyk_api_token: Option<String>,
    /// Overrides the public Snyk REST base URL
    pub snyk_api_url: Option<String>,
    /// Overrides the public Snyk v1 organization listing URL
    pub snyk_orgs_url: Option<String>,
    pub wiz_api_url: Option<String>,
    pub wiz_credentials: Option<WizCredentials>,
}

impl fmt::Debug for HandlerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSettings")
            .field("network_events_url", &self.network_events_url)
            .field("snyk_api_token", &self.snyk_api_token.as_ref().map(|_| "<redacted>"))
            .field("snyk_api_url", &self.snyk_api_url)
            .field("snyk_orgs_url", &self.snyk_orgs_url)
            .field("wiz_api_url", &self.wiz_api_url)
            .field("wiz_credentials", &self.wiz_credentials)
            .finish()
    }
}

/// Network-connection events from a REST feed (`{"data": [...]}`)
pub fn network_events_handler(
    client: Client,
    url: &str,
    retry: RetryPolicy,
    table: &str,
) -> Result<Handler, CollectorError> {
    Ok(Handler::new(
        Arc::new(RestCollector::from_url(client, url, retry)?),
        Normalizer::network_connection(),
        Destination::Table(table.to_string()),
    ))
}

/// Open Wiz issues, walked project by project over GraphQL
pub fn wiz_issues_handler(
    client: Client,
    graphql_url: &str,
    credentials: WizCredentials,
    retry: RetryPolicy,
    table: &str,
) -> Handler {
    Handler::new(
        Arc::new(WizCollector::new(client, graphql_url, credentials, retry)),
        Normalizer::Wiz,
        Destination::Table(table.to_string()),
    )
}

/// Snyk Code issues fetched and decorated from the Snyk API
pub fn snyk_code_api_handler(
    client: Client,
    settings: &HandlerSettings,
    api_token: &str,
    retry: RetryPolicy,
    table: &str,
) -> Handler {
    let mut collector = SnykCodeCollector::new(client, api_token, retry);
    if let Some(url) = &settings.snyk_api_url {
        collector = collector.with_rest_url(url.clone());
    }
    if let Some(url) = &settings.snyk_orgs_url {
        collector = collector.with_orgs_url(url.clone());
    }

    Handler::new(
        Arc::new(collector),
        Normalizer::SnykCode,
        Destination::Table(table.to_string()),
    )
}

/// Decorated Snyk Code issues carried in `handlerData.issues`
pub fn snyk_code_handler(table: &str) -> Handler {
    Handler::new(
        Arc::new(InlineCollector::new("issues")),
        Normalizer::SnykCode,
        Destination::Table(table.to_string()),
    )
}

/// Findings forwarded by another dispatcher in `handlerData.findings`
pub fn forwarded_findings_handler(table: &str) -> Handler {
    Handler::new(
        Arc::new(InlineCollector::new("findings")),
        Normalizer::Canonical,
        Destination::Table(table.to_string()),
    )
}

/// Registry of every handler `settings` has enough configuration for.
///
/// Fails when a configured upstream URL cannot be used.
pub fn build_registry(
    client: Client,
    settings: &HandlerSettings,
    retry: RetryPolicy,
    table: &str,
) -> Result<HandlerRegistry, CollectorError> {
    let mut registry = HandlerRegistry::new();
    registry.register(FORWARDED_FINDINGS_HANDLER, forwarded_findings_handler(table));

    if let Some(url) = &settings.network_events_url {
        registry.register(
            NETWORK_EVENTS_HANDLER,
            network_events_handler(client.clone(), url, retry.clone(), table)?,
        );
    }

    match &settings.snyk_api_token {
        Some(token) => {
            registry.register(
                SNYK_CODE_HANDLER,
                snyk_code_api_handler(client.clone(), settings, token, retry.clone(), table),
            );
        }
        None => {
            info!("Snyk token not configured, {SNYK_CODE_HANDLER} reads issues from the envelope");
            registry.register(SNYK_CODE_HANDLER, snyk_code_handler(table));
        }
    }

    match (&settings.wiz_api_url, &settings.wiz_credentials) {
        (Some(url), Some(credentials)) => {
            registry.register(
                WIZ_ISSUES_HANDLER,
                wiz_issues_handler(client, url, credentials.clone(), retry, table),
            );
        }
        _ => info!("Wiz credentials not configured, {WIZ_ISSUES_HANDLER} disabled"),
    }

    info!(handlers = ?registry.names(), "handler registry built");
    Ok(registry)
}
