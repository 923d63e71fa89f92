use std::fmt;
use thiserror::Error;

/// Upstream failures that are expected to clear up on their own.
///
/// This is the complete set of retryable conditions; every other failure
/// is fatal to the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// HTTP 502
    BadGateway,
    /// HTTP 503
    ServiceUnavailable,
    /// HTTP 504
    GatewayTimeout,
    /// The request timed out client-side
    RequestTimeout,
}

impl TransientKind {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            502 => Some(TransientKind::BadGateway),
            503 => Some(TransientKind::ServiceUnavailable),
            504 => Some(TransientKind::GatewayTimeout),
            _ => None,
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransientKind::BadGateway => "502: Bad Gateway",
            TransientKind::ServiceUnavailable => "503: Service Unavailable",
            TransientKind::GatewayTimeout => "504: Gateway Timeout",
            TransientKind::RequestTimeout => "request timed out",
        };
        f.write_str(text)
    }
}

/// Failure of a single page request
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient upstream failure ({0})")]
    Transient(TransientKind),

    #[error("upstream rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("unexpected upstream status: HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("malformed page: {0}")]
    MalformedPage(String),

    #[error("GraphQL errors: {0}")]
    GraphQl(String),
}

impl FetchError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        match TransientKind::from_status(status) {
            Some(kind) => FetchError::Transient(kind),
            None if status == 401 || status == 403 => FetchError::Unauthorized(status),
            None => FetchError::Status(status),
        }
    }

    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            FetchError::Transient(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Failure of a whole collection
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("page {page} still failing after {attempts} attempts: {kind}")]
    RetriesExhausted {
        page: usize,
        attempts: u32,
        kind: TransientKind,
    },

    #[error("page {page} failed: {source}")]
    Fatal {
        page: usize,
        #[source]
        source: FetchError,
    },

    #[error("could not obtain an access token: {0}")]
    Authentication(#[source] FetchError),

    #[error("invalid collector configuration: {0}")]
    InvalidConfig(String),
}
