use super::{merge_overrides, send_json};
use crate::domain::{
    collect_items, paginate, Collector, CollectorError, FetchError, Page, PageCursor, PageSource,
    RetryPolicy,
};
use async_trait::async_trait;
use common::domain::MessageEnvelope;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// GraphQL connection query paginated through `pageInfo.endCursor`.
///
/// The query must accept an `$after` variable.
pub struct GraphQlPageSource {
    client: Client,
    endpoint: String,
    query: String,
    query_name: String,
    variables: Map<String, Value>,
    authorization: Option<String>,
}

impl GraphQlPageSource {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        query: impl Into<String>,
        query_name: impl Into<String>,
        variables: Map<String, Value>,
        authorization: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            query: query.into(),
            query_name: query_name.into(),
            variables,
            authorization,
        }
    }
}

#[async_trait]
impl PageSource for GraphQlPageSource {
    async fn fetch_page(&self, cursor: Option<PageCursor>) -> Result<Page, FetchError> {
        let mut variables = self.variables.clone();
        match cursor {
            None => {}
            Some(PageCursor::After(after)) => {
                variables.insert("after".to_string(), after);
            }
            Some(PageCursor::NextUrl(_)) => {
                return Err(FetchError::MalformedPage(
                    "GraphQL pagination cannot follow a REST link".to_string(),
                ))
            }
        }

        let request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": self.query, "variables": variables }));
        let request = match &self.authorization {
            Some(auth) => request.header(reqwest::header::AUTHORIZATION, auth),
            None => request,
        };

        parse_graphql_page(&send_json(request).await?, &self.query_name)
    }
}

/// Parse `{ "data": { <query_name>: { "nodes": [...], "pageInfo": {...} } } }`
pub fn parse_graphql_page(body: &Value, query_name: &str) -> Result<Page, FetchError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
                .collect();
            return Err(FetchError::GraphQl(messages.join("; ")));
        }
    }

    let Some(connection) = body.get("data").and_then(|data| data.get(query_name)) else {
        debug!(query = %query_name, "response has no connection");
        return Ok(Page::default());
    };

    let items = match connection.get("nodes") {
        Some(Value::Array(nodes)) => nodes.clone(),
        Some(_) => {
            return Err(FetchError::MalformedPage(format!(
                "{query_name}.nodes is not an array"
            )))
        }
        None => {
            debug!(query = %query_name, "page has no nodes");
            Vec::new()
        }
    };

    let Some(page_info) = connection.get("pageInfo") else {
        return Ok(Page::last(items));
    };

    let has_next = page_info
        .get("hasNextPage")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !has_next {
        return Ok(Page::last(items));
    }

    match page_info.get("endCursor") {
        Some(cursor) if !cursor.is_null() => {
            Ok(Page::new(items, Some(PageCursor::After(cursor.clone()))))
        }
        _ => Err(FetchError::MalformedPage(format!(
            "{query_name}.pageInfo has hasNextPage without endCursor"
        ))),
    }
}

/// Collector over a paginated GraphQL connection.
///
/// `handlerConfig.query` overrides the default variables per envelope.
pub struct GraphQlCollector {
    client: Client,
    endpoint: String,
    query: String,
    query_name: String,
    default_variables: Map<String, Value>,
    authorization: Option<String>,
    retry: RetryPolicy,
}

impl GraphQlCollector {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        query: impl Into<String>,
        query_name: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            query: query.into(),
            query_name: query_name.into(),
            default_variables: Map::new(),
            authorization: None,
            retry,
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.default_variables = variables;
        self
    }

    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    /// Every node of the connection, with `variables` sent on each page
    pub async fn collect_with_variables(
        &self,
        variables: Map<String, Value>,
    ) -> Result<Vec<Value>, CollectorError> {
        let source = GraphQlPageSource::new(
            self.client.clone(),
            self.endpoint.clone(),
            self.query.clone(),
            self.query_name.clone(),
            variables,
            self.authorization.clone(),
        );
        collect_items(paginate(Arc::new(source), self.retry.clone())).await
    }
}

#[async_trait]
impl Collector for GraphQlCollector {
    #[instrument(skip(self, envelope), fields(query = %self.query_name))]
    async fn collect(&self, envelope: &MessageEnvelope) -> Result<Vec<Value>, CollectorError> {
        let variables =
            merge_overrides(&self.default_variables, envelope.handler_config.get("query"));
        let items = self.collect_with_variables(variables).await?;
        info!(items = items.len(), "collected GraphQL nodes");
        Ok(items)
    }
}
