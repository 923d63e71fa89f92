use super::{merge_overrides, send_json, GraphQlPageSource};
use crate::domain::{collect_items, paginate, Collector, CollectorError, FetchError, RetryPolicy};
use async_trait::async_trait;
use common::domain::MessageEnvelope;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const WIZ_AUTH_URL: &str = "https://auth.app.wiz.io";
const WIZ_AUDIENCE: &str = "wiz-api";

const PROJECTS_QUERY: &str = "query ProjectsTable($filterBy: ProjectFilters, $first: Int, $after: String, $orderBy: ProjectOrder) { projects(filterBy: $filterBy, first: $first, after: $after, orderBy: $orderBy) { nodes { id name slug archived } pageInfo { hasNextPage endCursor } totalCount } }";

const WIZ_ISSUES_QUERY: &str = "query IssuesTable($filterBy: IssueFilters, $first: Int, $after: String, $orderBy: IssueOrder) { issues(filterBy: $filterBy, first: $first, after: $after, orderBy: $orderBy) { nodes { ...IssueDetails } pageInfo { hasNextPage endCursor } totalCount } } fragment IssueDetails on Issue { id control { id name securitySubCategories { id category { id } } } createdAt updatedAt status severity entity { id name type } resolutionReason entitySnapshot { id type name cloudPlatform cloudProviderURL region subscriptionName externalId subscriptionId subscriptionExternalId subscriptionTags nativeType } notes { id text } }";

/// How the collector authenticates against the GraphQL API
#[derive(Clone)]
pub enum WizCredentials {
    /// Pre-issued bearer token
    Token(String),
    /// OAuth client credentials, exchanged for a token on every collection
    ClientCredentials {
        auth_url: String,
        client_id: String,
        client_secret: String,
    },
}

impl fmt::Debug for WizCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WizCredentials::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
            WizCredentials::ClientCredentials {
                auth_url,
                client_id,
                ..
            } => f
                .debug_struct("ClientCredentials")
                .field("auth_url", auth_url)
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Open Wiz issues, walked project by project.
///
/// `handlerConfig.query` overrides the issue query variables; the project
/// filter is always set by the walk. An issue shared by several projects is
/// collected once.
pub struct WizCollector {
    client: Client,
    graphql_url: String,
    credentials: WizCredentials,
    retry: RetryPolicy,
}

impl WizCollector {
    pub fn new(
        client: Client,
        graphql_url: impl Into<String>,
        credentials: WizCredentials,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            graphql_url: graphql_url.into(),
            credentials,
            retry,
        }
    }

    async fn access_token(&self) -> Result<String, CollectorError> {
        let (auth_url, client_id, client_secret) = match &self.credentials {
            WizCredentials::Token(token) => return Ok(token.clone()),
            WizCredentials::ClientCredentials {
                auth_url,
                client_id,
                client_secret,
            } => (auth_url, client_id, client_secret),
        };

        let request = self
            .client
            .post(format!("{}/oauth/token", auth_url.trim_end_matches('/')))
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("audience", WIZ_AUDIENCE),
            ]);

        let body = send_json(request)
            .await
            .map_err(CollectorError::Authentication)?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CollectorError::Authentication(FetchError::MalformedPage(
                    "token response has no access_token".to_string(),
                ))
            })?;

        debug!(client_id = %client_id, "obtained access token");
        Ok(token.to_string())
    }

    async fn run_query(
        &self,
        query: &str,
        query_name: &str,
        variables: Map<String, Value>,
        authorization: &str,
    ) -> Result<Vec<Value>, CollectorError> {
        let source = GraphQlPageSource::new(
            self.client.clone(),
            self.graphql_url.clone(),
            query,
            query_name,
            variables,
            Some(authorization.to_string()),
        );
        collect_items(paginate(Arc::new(source), self.retry.clone())).await
    }
}

#[async_trait]
impl Collector for WizCollector {
    #[instrument(skip(self, envelope), fields(url = %self.graphql_url))]
    async fn collect(&self, envelope: &MessageEnvelope) -> Result<Vec<Value>, CollectorError> {
        let authorization = format!("Bearer {}", self.access_token().await?);

        let projects = self
            .run_query(PROJECTS_QUERY, "projects", project_variables(), &authorization)
            .await?;
        info!(projects = projects.len(), "listed Wiz projects");

        let variables = merge_overrides(&issue_variables(), envelope.handler_config.get("query"));
        let mut seen = HashSet::new();
        let mut issues = Vec::new();
        for project in &projects {
            let Some(project_id) = project.get("id").and_then(Value::as_str) else {
                debug!("skipping project without id");
                continue;
            };

            let nodes = self
                .run_query(
                    WIZ_ISSUES_QUERY,
                    "issues",
                    for_project(&variables, project_id),
                    &authorization,
                )
                .await?;
            debug!(project = %project_id, issues = nodes.len(), "collected project issues");

            for node in nodes {
                let first_sighting = match node.get("id").and_then(Value::as_str) {
                    Some(id) => seen.insert(id.to_string()),
                    None => true,
                };
                if first_sighting {
                    issues.push(node);
                }
            }
        }

        info!(items = issues.len(), "collected Wiz issues");
        Ok(issues)
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn project_variables() -> Map<String, Value> {
    object(json!({"first": 100, "filterBy": {}}))
}

fn issue_variables() -> Map<String, Value> {
    object(json!({
        "first": 500,
        "filterBy": {"status": ["OPEN", "IN_PROGRESS"], "relatedEntity": {}},
        "orderBy": {"field": "SEVERITY", "direction": "DESC"}
    }))
}

/// `variables` with `filterBy.project` narrowed to `project_id`
fn for_project(variables: &Map<String, Value>, project_id: &str) -> Map<String, Value> {
    let mut variables = variables.clone();
    let mut filter = match variables.remove("filterBy") {
        Some(Value::Object(filter)) => filter,
        _ => Map::new(),
    };
    filter.insert("project".to_string(), json!([project_id]));
    variables.insert("filterBy".to_string(), Value::Object(filter));
    variables
}
