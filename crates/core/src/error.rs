//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("lex error at byte offset {offset}")]
    Lex { offset: usize },

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
