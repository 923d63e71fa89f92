use super::{merge_overrides, send_json};
use crate::domain::{
    collect_items, paginate, Collector, CollectorError, FetchError, Page, PageCursor, PageSource,
    RetryPolicy,
};
use async_trait::async_trait;
use common::domain::MessageEnvelope;
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// REST endpoint paginated through `links.next`
pub struct RestPageSource {
    client: Client,
    base_url: String,
    path: String,
    query: Vec<(String, String)>,
    authorization: Option<String>,
    empty_on_not_found: bool,
}

impl RestPageSource {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        path: impl Into<String>,
        query: &Map<String, Value>,
        authorization: Option<String>,
    ) -> Self {
        let query = query
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect();

        Self {
            client,
            base_url: base_url.into(),
            path: path.into(),
            query,
            authorization,
            empty_on_not_found: false,
        }
    }

    /// Treat a 404 on the first request as an empty listing.
    ///
    /// Later pages are always fatal on 404: the traversal was already
    /// under way and the remaining pages would be lost.
    pub fn with_empty_on_not_found(mut self) -> Self {
        self.empty_on_not_found = true;
        self
    }
}

#[async_trait]
impl PageSource for RestPageSource {
    async fn fetch_page(&self, cursor: Option<PageCursor>) -> Result<Page, FetchError> {
        let first_page = cursor.is_none();
        let request = match cursor {
            None => self
                .client
                .get(format!("{}{}", self.base_url, self.path))
                .query(&self.query),
            // The next link already carries the query
            Some(PageCursor::NextUrl(next)) => self.client.get(resolve_next_url(&self.base_url, &next)),
            Some(PageCursor::After(_)) => {
                return Err(FetchError::MalformedPage(
                    "REST pagination cannot follow a GraphQL cursor".to_string(),
                ))
            }
        };
        let request = match &self.authorization {
            Some(auth) => request.header(reqwest::header::AUTHORIZATION, auth),
            None => request,
        };

        match send_json(request).await {
            Ok(body) => parse_rest_page(&body),
            Err(FetchError::Status(404)) if first_page && self.empty_on_not_found => {
                debug!(path = %self.path, "listing not found, treating as empty");
                Ok(Page::default())
            }
            Err(e) => Err(e),
        }
    }
}

/// Absolute `next` links are used as-is; root-relative ones hang off `base_url`
pub fn resolve_next_url(base_url: &str, next: &str) -> String {
    if next.starts_with("http://") || next.starts_with("https://") {
        next.to_string()
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), next)
    }
}

/// Split a full endpoint URL into its origin and its path (with query).
///
/// `https://host/basic?x=1` becomes `("https://host", "/basic?x=1")`, so a
/// root-relative `links.next` resolves against the host and not the path.
pub fn split_endpoint(url: &str) -> Result<(String, String), CollectorError> {
    let parsed =
        Url::parse(url).map_err(|e| CollectorError::InvalidConfig(format!("invalid URL {url:?}: {e}")))?;
    if !parsed.has_host() {
        return Err(CollectorError::InvalidConfig(format!("URL {url:?} has no host")));
    }

    let origin = parsed.origin().ascii_serialization();
    let mut path = match parsed.path() {
        "/" => String::new(),
        path => path.to_string(),
    };
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }
    Ok((origin, path))
}

/// Parse `{ "data": [...], "links": { "next": string | null } }`
pub fn parse_rest_page(body: &Value) -> Result<Page, FetchError> {
    let items = match body.get("data") {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(FetchError::MalformedPage("`data` is not an array".to_string()));
        }
        None => {
            debug!("page has no data");
            Vec::new()
        }
    };

    let next = body
        .pointer("/links/next")
        .and_then(Value::as_str)
        .map(|next| PageCursor::NextUrl(next.to_string()));

    Ok(Page::new(items, next))
}

/// Collector over a paginated REST endpoint.
///
/// `handlerConfig.query` overrides the default query parameters per envelope.
pub struct RestCollector {
    client: Client,
    base_url: String,
    path: String,
    default_query: Map<String, Value>,
    authorization: Option<String>,
    empty_on_not_found: bool,
    retry: RetryPolicy,
}

impl RestCollector {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        path: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            path: path.into(),
            default_query: Map::new(),
            authorization: None,
            empty_on_not_found: false,
            retry,
        }
    }

    /// Collector for a full endpoint URL; `links.next` resolves against its origin
    pub fn from_url(client: Client, url: &str, retry: RetryPolicy) -> Result<Self, CollectorError> {
        let (base_url, path) = split_endpoint(url)?;
        Ok(Self::new(client, base_url, path, retry))
    }

    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.default_query = query;
        self
    }

    /// Value of the `Authorization` header sent with every page request
    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    /// See [`RestPageSource::with_empty_on_not_found`]
    pub fn with_empty_on_not_found(mut self) -> Self {
        self.empty_on_not_found = true;
        self
    }

    fn page_source(&self, query: &Map<String, Value>) -> RestPageSource {
        let source = RestPageSource::new(
            self.client.clone(),
            self.base_url.clone(),
            self.path.clone(),
            query,
            self.authorization.clone(),
        );
        if self.empty_on_not_found {
            source.with_empty_on_not_found()
        } else {
            source
        }
    }

    /// Every item of the listing, with `query` as the request parameters
    pub async fn collect_with_query(
        &self,
        query: &Map<String, Value>,
    ) -> Result<Vec<Value>, CollectorError> {
        let source = self.page_source(query);
        collect_items(paginate(Arc::new(source), self.retry.clone())).await
    }
}

#[async_trait]
impl Collector for RestCollector {
    #[instrument(skip(self, envelope), fields(url = %format!("{}{}", self.base_url, self.path)))]
    async fn collect(&self, envelope: &MessageEnvelope) -> Result<Vec<Value>, CollectorError> {
        let query = merge_overrides(&self.default_query, envelope.handler_config.get("query"));
        let items = self.collect_with_query(&query).await?;
        info!(items = items.len(), "collected REST items");
        Ok(items)
    }
}
