//! Engine error types.

use cqldrift_state::StateError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from discovery, script application, and scheduling.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("init script not found at {path}")]
    InitMissing { path: PathBuf },

    #[error("failed to canonicalize {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: cqldrift_core::Error,
    },

    #[error(
        "failed migration found, manual intervention required: {keyspace}/{service}/{file}"
    )]
    FailedMigration {
        keyspace: String,
        service: String,
        file: String,
    },

    #[error(
        "checksum mismatch for {keyspace}/{service}/{file}: stored {stored}, computed {computed}"
    )]
    ChecksumMismatch {
        keyspace: String,
        service: String,
        file: String,
        stored: String,
        computed: String,
    },

    #[error("{failed} bootstrap(s) failed")]
    BootstrapPhaseFailed { failed: usize },

    #[error("round {round} failed: {failed} migration(s) did not apply")]
    RoundFailed { round: usize, failed: usize },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
