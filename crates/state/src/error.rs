//! State-plane error types.

use thiserror::Error;

/// Errors from the session seam and the metadata gateway.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("statement failed: {message}")]
    Statement { message: String },

    #[error("session unavailable: {0}")]
    Session(String),

    #[error("empty record for table {table}")]
    EmptyRecord { table: String },

    #[error("unexpected result shape from {context}")]
    Decode { context: String },
}

/// Result type for state-plane operations.
pub type StateResult<T> = std::result::Result<T, StateError>;
