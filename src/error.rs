// Error taxonomy for the audit reporting core
//
// Every failure surfaces to the caller as-is; nothing is retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    /// The filter flags added up to a discriminant with no query shape.
    /// Unreachable through `SearchCriteria`, kept as a hard error anyway.
    #[error("unsupported filter combination (discriminant {0})")]
    UnsupportedFilterCombination(u8),

    /// The store rejected or failed the query.
    #[error("query execution failed: {0}")]
    QueryExecution(#[from] rusqlite::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;
