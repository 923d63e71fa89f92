use super::{resolve_next_url, send_json, RestPageSource};
use crate::domain::{
    collect_items, paginate, Collector, CollectorError, FetchError, Page, PageCursor, PageSource,
    RetryPolicy,
};
use async_trait::async_trait;
use common::domain::MessageEnvelope;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const SNYK_REST_URL: &str = "https://api.snyk.io/rest";
pub const SNYK_ORGS_URL: &str = "https://snyk.io/api/v1/orgs";

const PROJECTS_VERSION: &str = "beta";
const ISSUES_VERSION: &str = "2022-04-06~experimental";
const PAGE_LIMIT: &str = "100";
const DECORATION_FAILED: &str = "DecorationFailed";

/// The v1 organization listing, served as a single page under `orgs`
struct OrgListSource {
    client: Client,
    url: String,
    authorization: String,
}

#[async_trait]
impl PageSource for OrgListSource {
    async fn fetch_page(&self, _cursor: Option<PageCursor>) -> Result<Page, FetchError> {
        let request = self
            .client
            .get(&self.url)
            .header(AUTHORIZATION, &self.authorization);

        match send_json(request).await?.get("orgs") {
            Some(Value::Array(orgs)) => Ok(Page::last(orgs.clone())),
            _ => Err(FetchError::MalformedPage(
                "organization listing has no `orgs` array".to_string(),
            )),
        }
    }
}

/// Snyk Code issues of every project of every visible organization.
///
/// Each issue is flattened from its `attributes`, decorated from its
/// `links.self` document and tagged with the organization slug, project
/// and a link into the Snyk app. `handlerConfig.orgs` restricts the walk to
/// the listed organization ids.
pub struct SnykCodeCollector {
    client: Client,
    rest_url: String,
    orgs_url: String,
    authorization: String,
    retry: RetryPolicy,
}

impl SnykCodeCollector {
    pub fn new(client: Client, api_token: &str, retry: RetryPolicy) -> Self {
        Self {
            client,
            rest_url: SNYK_REST_URL.to_string(),
            orgs_url: SNYK_ORGS_URL.to_string(),
            authorization: format!("token {api_token}"),
            retry,
        }
    }

    pub fn with_rest_url(mut self, rest_url: impl Into<String>) -> Self {
        self.rest_url = rest_url.into();
        self
    }

    pub fn with_orgs_url(mut self, orgs_url: impl Into<String>) -> Self {
        self.orgs_url = orgs_url.into();
        self
    }

    async fn orgs(&self) -> Result<Vec<Value>, CollectorError> {
        let source = OrgListSource {
            client: self.client.clone(),
            url: self.orgs_url.clone(),
            authorization: self.authorization.clone(),
        };
        collect_items(paginate(Arc::new(source), self.retry.clone())).await
    }

    /// Every `data` item under `path`; a missing listing is empty
    async fn list(&self, path: String, query: &[(&str, &str)]) -> Result<Vec<Value>, CollectorError> {
        let query: Map<String, Value> = query
            .iter()
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();
        let source = RestPageSource::new(
            self.client.clone(),
            self.rest_url.clone(),
            path,
            &query,
            Some(self.authorization.clone()),
        )
        .with_empty_on_not_found();

        collect_items(paginate(Arc::new(source), self.retry.clone())).await
    }

    /// Attributes of the issue document at `self_link`, or `None` when it
    /// cannot be fetched
    async fn issue_details(&self, self_link: Option<&str>) -> Option<Value> {
        let link = self_link?;
        let request = self
            .client
            .get(resolve_next_url(&self.rest_url, link))
            .header(AUTHORIZATION, &self.authorization);

        match send_json(request).await {
            Ok(body) => {
                let details = body.pointer("/data/attributes").cloned();
                if details.is_none() {
                    warn!(link = %link, "issue document has no attributes");
                }
                details
            }
            Err(e) => {
                warn!(link = %link, error = %e, "unable to decorate issue");
                None
            }
        }
    }

    async fn decorated_issue(&self, raw: &Value, project: &ProjectContext<'_>) -> Value {
        let mut issue = issue_record(raw, project);
        let details = self.issue_details(raw.pointer("/links/self").and_then(Value::as_str)).await;
        decorate(&mut issue, details.as_ref());
        Value::Object(issue)
    }
}

#[async_trait]
impl Collector for SnykCodeCollector {
    #[instrument(skip(self, envelope))]
    async fn collect(&self, envelope: &MessageEnvelope) -> Result<Vec<Value>, CollectorError> {
        let wanted = requested_orgs(envelope.handler_config.get("orgs"))?;
        let orgs = self.orgs().await?;
        info!(orgs = orgs.len(), "listed Snyk organizations");

        let mut issues = Vec::new();
        for org in &orgs {
            let Some(org_id) = org.get("id").and_then(Value::as_str) else {
                warn!("skipping organization without id");
                continue;
            };
            if let Some(wanted) = &wanted {
                if !wanted.iter().any(|id| id == org_id) {
                    debug!(org = %org_id, "organization not requested");
                    continue;
                }
            }
            let org_slug = org.get("slug").and_then(Value::as_str).unwrap_or(org_id);

            let projects = self
                .list(
                    format!("/orgs/{org_id}/projects"),
                    &[("version", PROJECTS_VERSION), ("limit", PAGE_LIMIT)],
                )
                .await?;
            debug!(org = %org_slug, projects = projects.len(), "listed projects");

            for project in &projects {
                let Some(project_id) = project.get("id").and_then(Value::as_str) else {
                    warn!(org = %org_slug, "skipping project without id");
                    continue;
                };
                let context = ProjectContext {
                    org_slug,
                    project_id,
                    repo_name: project
                        .pointer("/attributes/name")
                        .and_then(Value::as_str)
                        .unwrap_or(project_id),
                };

                let raw_issues = self
                    .list(
                        format!("/orgs/{org_id}/issues"),
                        &[
                            ("project_id", project_id),
                            ("version", ISSUES_VERSION),
                            ("limit", PAGE_LIMIT),
                        ],
                    )
                    .await?;
                debug!(project = %project_id, issues = raw_issues.len(), "decorating issues");

                for raw in &raw_issues {
                    issues.push(self.decorated_issue(raw, &context).await);
                }
            }
        }

        info!(items = issues.len(), "collected Snyk Code issues");
        Ok(issues)
    }
}

struct ProjectContext<'a> {
    org_slug: &'a str,
    project_id: &'a str,
    repo_name: &'a str,
}

/// `handlerConfig.orgs` as a list of organization ids
fn requested_orgs(config: Option<&Value>) -> Result<Option<Vec<String>>, CollectorError> {
    match config {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(ids)) => ids
            .iter()
            .map(|id| {
                id.as_str().map(str::to_string).ok_or_else(|| {
                    CollectorError::InvalidConfig("handlerConfig.orgs must hold strings".to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(CollectorError::InvalidConfig(
            "handlerConfig.orgs must be an array".to_string(),
        )),
    }
}

/// The issue's attributes lifted to the top level, tagged with its project
fn issue_record(raw: &Value, project: &ProjectContext<'_>) -> Map<String, Value> {
    let mut issue = match raw.get("attributes") {
        Some(Value::Object(attributes)) => attributes.clone(),
        _ => Map::new(),
    };

    let id = raw.get("id").cloned().unwrap_or(Value::Null);
    if let Some(id) = id.as_str() {
        issue.insert(
            "issueLink".to_string(),
            json!(format!(
                "https://app.snyk.io/org/{}/project/{}#issue-{}",
                project.org_slug, project.project_id, id
            )),
        );
    }
    issue.insert("id".to_string(), id);
    issue.insert(
        "issueURL".to_string(),
        raw.pointer("/links/self").cloned().unwrap_or(Value::Null),
    );
    issue.insert("projectId".to_string(), json!(project.project_id));
    issue.insert("orgName".to_string(), json!(project.org_slug));
    issue.insert("repoName".to_string(), json!(project.repo_name));
    issue
}

/// Copy title, file and region from the issue document, with placeholders
/// for whatever could not be fetched
fn decorate(issue: &mut Map<String, Value>, details: Option<&Value>) {
    for (from, to) in [
        ("title", "longTitle"),
        ("primaryFilePath", "primaryFilePath"),
        ("primaryRegion", "locationData"),
    ] {
        let value = details
            .and_then(|details| details.get(from))
            .cloned()
            .unwrap_or_else(|| json!(DECORATION_FAILED));
        issue.insert(to.to_string(), value);
    }
}
