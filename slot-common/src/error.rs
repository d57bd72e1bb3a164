use thiserror::Error;

/// Enumeration of errors raised by a `LeaseStore`.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("transaction {command} failed with: {error}")]
    TransactionError { command: String, error: sqlx::Error },
    #[error("schema migration failed with: {error}")]
    MigrationError { error: sqlx::migrate::MigrateError },
}

/// Errors surfaced to callers of the allocator, updater and enumerator.
///
/// Nothing here is retried internally: a failed allocation is a decision over a snapshot
/// that no longer exists, so retrying only makes sense from the caller's side.
#[derive(Error, Debug)]
pub enum SlotError {
    #[error("{0}")]
    Validation(String),
    #[error("lease store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("no lease record is available to reclaim")]
    EmptyLeaseTable,
}

impl SlotError {
    pub fn validation(message: impl Into<String>) -> Self {
        SlotError::Validation(message.into())
    }
}

/// Errors returned by the worker-side `SlotClient`.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid slot api url {url}: {error}")]
    InvalidUrl {
        url: String,
        error: url::ParseError,
    },
    #[error("failed to build http client: {0}")]
    ClientBuildError(reqwest::Error),
    #[error("slot api request failed: {0}")]
    RequestError(reqwest::Error),
    #[error("slot api responded with {status}: {body}")]
    StatusError {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("could not decode slot api response: {0}")]
    DecodeError(reqwest::Error),
    #[error(transparent)]
    Slot(#[from] SlotError),
}

impl ClientError {
    /// Transport failures, throttling and server errors are worth another attempt.
    /// Anything else would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::RequestError(_) => true,
            ClientError::StatusError { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
