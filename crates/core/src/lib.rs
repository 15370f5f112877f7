//! Core domain types and shared logic for the cqldrift migration
//! orchestrator.
//!
//! This crate defines the pure, cluster-free parts of the data model:
//! - CQL tokenization and the canonical script form
//! - Checksums over canonical bodies
//! - Script coordinates derived from path depth, and statement splitting
//! - Run configuration

pub mod checksum;
pub mod config;
pub mod error;
pub mod lexer;
pub mod script;

pub use checksum::Checksum;
pub use config::MigrateConfig;
pub use error::{Error, Result};
pub use lexer::{canonicalize, tokenize, Token, TokenKind};
pub use script::{classify, statements, ScriptKind};
