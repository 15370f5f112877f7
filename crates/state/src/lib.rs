//! Cluster state plane for cqldrift.
//!
//! This crate owns everything that touches the database:
//! - The driver session seam ([`CqlSession`], [`SessionFactory`]) and the
//!   per-keyspace [`SessionRegistry`]
//! - The metadata gateway ([`StateStore`]) with typed operations over the
//!   tool's `locks`, `migrations`, and `bootstraps` tables, plus the
//!   cluster schema-agreement probe
//! - The conditional-write distributed lock ([`MigrationLock`])
//! - An in-process simulated cluster ([`MemoryCluster`]) backing rehearsal
//!   runs and tests
//!
//! Production deployments plug a real driver in by implementing
//! [`CqlSession`] and [`SessionFactory`] over it; the orchestrator never
//! sees anything below the seam.

pub mod error;
pub mod lock;
pub mod memory;
pub mod models;
pub mod session;
pub mod store;

pub use error::{StateError, StateResult};
pub use lock::{MigrationLock, MIGRATION_LOCK};
pub use memory::{ExecutedStatement, MemoryCluster, MemorySession};
pub use models::{BootstrapRow, MigrationRow};
pub use session::{
    ClusterTopology, Consistency, CqlSession, PeerInfo, ResultSet, Row, SessionFactory,
    SessionRegistry, Statement, Value,
};
pub use store::StateStore;
