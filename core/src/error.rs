use surrealix_proto::CodecError;
use thiserror::Error;

/// Whether a rollback restored the database after a failed commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackStatus {
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl std::fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackStatus::Succeeded => write!(f, "rolled back"),
            RollbackStatus::Failed => write!(f, "rollback failed"),
            RollbackStatus::Unknown => write!(f, "rollback state unknown"),
        }
    }
}

/// Server messages that indicate a retryable transaction conflict.
const CONFLICT_PATTERNS: [&str; 4] = ["can be retried", "failed transaction", "conflict", "document changed"];

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection: {0}")]
    Connection(String),
    #[error("authentication: {0}")]
    Authentication(String),
    #[error("query failed: {message}")]
    Query { message: String, code: Option<i64>, sql: Option<String> },
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("validation: {0}")]
    Validation(String),
    #[error("live query: {0}")]
    LiveQuery(String),
    #[error("change feed: {0}")]
    ChangeFeed(String),
    #[error("transaction: {message} ({rollback})")]
    Transaction { message: String, rollback: RollbackStatus },
    #[error("transaction conflict: {message} ({rollback})")]
    TransactionConflict { message: String, rollback: RollbackStatus },
}

impl Error {
    pub fn connection(message: impl Into<String>) -> Self { Error::Connection(message.into()) }

    pub fn query(message: impl Into<String>, code: Option<i64>) -> Self {
        Error::Query { message: message.into(), code, sql: None }
    }

    pub fn query_with_sql(message: impl Into<String>, code: Option<i64>, sql: impl Into<String>) -> Self {
        Error::Query { message: message.into(), code, sql: Some(sql.into()) }
    }

    /// Build a transaction error, refining it into a retryable conflict when
    /// the server message matches one of the known conflict patterns.
    pub fn transaction(message: impl Into<String>, rollback: RollbackStatus) -> Self {
        let message = message.into();
        if is_conflict_message(&message) {
            Error::TransactionConflict { message, rollback }
        } else {
            Error::Transaction { message, rollback }
        }
    }

    /// True for transaction conflicts that are safe to retry with backoff.
    pub fn is_retryable_conflict(&self) -> bool { matches!(self, Error::TransactionConflict { .. }) }

    pub fn rollback_status(&self) -> Option<RollbackStatus> {
        match self {
            Error::Transaction { rollback, .. } | Error::TransactionConflict { rollback, .. } => Some(*rollback),
            _ => None,
        }
    }
}

pub fn is_conflict_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONFLICT_PATTERNS.iter().any(|p| lower.contains(p))
}

// Codec failures mean the wire is corrupt or the schema mismatched.
impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self { Error::Connection(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, Error>;
