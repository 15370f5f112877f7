//! Driver session seam.
//!
//! The orchestrator never talks to a driver directly; it goes through
//! [`CqlSession`], which carries the only two things it needs from a
//! cluster: statement execution and the driver's view of peer topology.
//! Production deployments implement this trait over their driver of choice;
//! [`crate::MemoryCluster`] implements it in-process for rehearsal runs and
//! tests.

use crate::error::StateResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Consistency level for a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    One,
    Quorum,
    /// Every replica. The orchestrator runs everything at ALL so that a
    /// completed statement is visible cluster-wide before the next one.
    #[default]
    All,
}

/// The small CQL value model the tool needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Uuid(Uuid),
    Timestamp(OffsetDateTime),
    Boolean(bool),
    Int(i64),
    Null,
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<OffsetDateTime> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// A statement plus its execution options.
#[derive(Debug, Clone)]
pub struct Statement {
    pub cql: String,
    pub values: Vec<Value>,
    pub consistency: Consistency,
    pub timeout: Option<Duration>,
    /// Whether the driver may cache the prepared form. On by default.
    pub cache_prepared: bool,
}

impl Statement {
    pub fn new(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            values: Vec::new(),
            consistency: Consistency::All,
            timeout: None,
            cache_prepared: true,
        }
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One result row, positional.
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub columns: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<Value>) -> Self {
        Self { columns }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.columns.get(index)
    }
}

/// Result of a statement execution.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Outcome of a conditional write: the server's `[applied]` column,
    /// first column of the first row. A malformed result counts as not
    /// applied.
    pub fn was_applied(&self) -> bool {
        self.rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A peer node as the driver sees it.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub address: String,
    pub data_center: String,
    pub rack: String,
    pub is_up: bool,
    /// The schema version the peer last reported. Included in agreement
    /// checks even when the peer is down.
    pub schema_version: Option<Uuid>,
}

/// The driver's view of the cluster beyond the local node.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    pub peers: Vec<PeerInfo>,
}

/// A connected session, bound to at most one keyspace.
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Execute one statement.
    async fn execute(&self, statement: &Statement) -> StateResult<ResultSet>;

    /// The driver's current topology view.
    async fn topology(&self) -> StateResult<ClusterTopology>;
}

/// Creates sessions on demand; `keyspace = None` yields the admin session
/// used for metadata tables and cluster-level queries.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, keyspace: Option<&str>) -> StateResult<Arc<dyn CqlSession>>;
}

/// Lazy one-session-per-keyspace registry.
///
/// Replaces module-global per-keyspace client singletons: the registry is
/// constructed once and passed through the orchestrator explicitly.
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    admin: tokio::sync::OnceCell<Arc<dyn CqlSession>>,
    by_keyspace: tokio::sync::Mutex<HashMap<String, Arc<dyn CqlSession>>>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            admin: tokio::sync::OnceCell::new(),
            by_keyspace: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The admin session, bound to no keyspace.
    pub async fn admin(&self) -> StateResult<Arc<dyn CqlSession>> {
        let session = self
            .admin
            .get_or_try_init(|| self.factory.connect(None))
            .await?;
        Ok(session.clone())
    }

    /// The session for one keyspace, connecting on first use.
    pub async fn keyspace(&self, keyspace: &str) -> StateResult<Arc<dyn CqlSession>> {
        let mut sessions = self.by_keyspace.lock().await;
        if let Some(session) = sessions.get(keyspace) {
            return Ok(session.clone());
        }
        let session = self.factory.connect(Some(keyspace)).await?;
        sessions.insert(keyspace.to_string(), session.clone());
        Ok(session)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}
