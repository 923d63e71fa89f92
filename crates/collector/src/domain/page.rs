use serde_json::Value;

/// Where the next page starts
#[derive(Debug, Clone, PartialEq)]
pub enum PageCursor {
    /// REST `links.next`
    NextUrl(String),
    /// GraphQL `pageInfo.endCursor`
    After(Value),
}

/// One page of raw upstream items
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub items: Vec<Value>,
    /// `None` when the upstream reports no further pages
    pub next: Option<PageCursor>,
}

impl Page {
    pub fn new(items: Vec<Value>, next: Option<PageCursor>) -> Self {
        Self { items, next }
    }

    pub fn last(items: Vec<Value>) -> Self {
        Self { items, next: None }
    }
}
