use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Collection failed: {0}")]
    CollectionFailed(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
