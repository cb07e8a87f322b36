//! Error types that callers need to tell apart.
//!
//! Most of the crate returns [`anyhow::Result`]; the enums here exist for the
//! few outcomes a caller must match on rather than just report.

use thiserror::Error;

/// SQLite primary result code for a generic SQL error. FTS5 reports query
/// syntax problems with this code, but so do schema failures such as a
/// missing table.
const SQLITE_ERROR: i32 = 1;

/// Message prefixes FTS5 uses for rejected `MATCH` expressions.
const FTS5_QUERY_ERRORS: &[&str] = &["fts5:", "unterminated string", "no such column:"];

/// Errors from the lexical (FTS5) index.
#[derive(Debug, Error)]
pub enum LexicalError {
    /// The query text could not be parsed by the full-text engine.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The store itself failed.
    #[error("lexical index error: {0}")]
    Store(#[from] sqlx::Error),
}

impl LexicalError {
    /// Classify an error raised while running a `MATCH` query.
    pub(crate) fn from_match_error(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let primary = db_err
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| c & 0xff);
            let message = db_err.message();
            if primary == Some(SQLITE_ERROR) && is_fts5_query_error(message) {
                return LexicalError::InvalidQuery(message.to_string());
            }
        }
        LexicalError::Store(err)
    }

    pub fn is_invalid_query(&self) -> bool {
        matches!(self, LexicalError::InvalidQuery(_))
    }
}

fn is_fts5_query_error(message: &str) -> bool {
    FTS5_QUERY_ERRORS
        .iter()
        .any(|prefix| message.starts_with(prefix))
}

/// Errors from a [`VectorBackend`](crate::vector::VectorBackend).
#[derive(Debug, Error)]
pub enum VectorError {
    /// A vector's length does not match the store's configured dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store error: {0}")]
    Store(#[from] sqlx::Error),
}
