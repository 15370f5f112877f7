//! In-process simulated cluster.
//!
//! Implements the session seam against in-memory tables so the full
//! orchestration can run without a live cluster: the `rehearse` command and
//! the test suites both drive it. It understands exactly the metadata-table
//! statements the gateway emits (locks, migrations, bootstraps, the local
//! system table) and records every other statement in an execution log.

use crate::error::{StateError, StateResult};
use crate::models::{BootstrapRow, MigrationRow};
use crate::session::{
    ClusterTopology, CqlSession, PeerInfo, ResultSet, Row, SessionFactory, Statement, Value,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One script statement the cluster accepted, with the keyspace of the
/// session that ran it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub keyspace: Option<String>,
    pub cql: String,
}

#[derive(Debug, Default)]
struct ClusterInner {
    locks: HashMap<String, Uuid>,
    migrations: BTreeMap<(String, String, String), MigrationRow>,
    /// Full write history of the migrations table, in order.
    migration_saves: Vec<MigrationRow>,
    bootstraps: Vec<BootstrapRow>,
    executed: Vec<ExecutedStatement>,
    /// Statements containing any of these substrings fail.
    failures: Vec<String>,
    local_schema_version: Option<Uuid>,
    peers: Vec<PeerInfo>,
    /// While positive, topology reports a divergent peer and the counter
    /// decrements once per probe.
    disagreement_probes: u32,
    agreement_probes: u64,
}

/// A simulated cluster shared by every session connected to it.
#[derive(Clone)]
pub struct MemoryCluster {
    meta_keyspace: String,
    inner: Arc<Mutex<ClusterInner>>,
}

impl MemoryCluster {
    pub fn new(meta_keyspace: impl Into<String>) -> Self {
        let inner = ClusterInner {
            local_schema_version: Some(Uuid::new_v4()),
            ..ClusterInner::default()
        };
        Self {
            meta_keyspace: meta_keyspace.into(),
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Open a session bound to the given keyspace.
    pub fn session(&self, keyspace: Option<&str>) -> MemorySession {
        MemorySession {
            keyspace: keyspace.map(str::to_string),
            meta_keyspace: self.meta_keyspace.clone(),
            inner: self.inner.clone(),
        }
    }

    // -- test and rehearsal knobs --------------------------------------------

    /// Fail any statement whose text contains `needle`.
    pub fn fail_matching(&self, needle: impl Into<String>) {
        self.inner.lock().unwrap().failures.push(needle.into());
    }

    /// Stop injecting statement failures.
    pub fn clear_failures(&self) {
        self.inner.lock().unwrap().failures.clear();
    }

    /// Report schema disagreement for the next `probes` agreement checks.
    pub fn disagree_for(&self, probes: u32) {
        self.inner.lock().unwrap().disagreement_probes = probes;
    }

    /// Add a peer to the topology view.
    pub fn add_peer(
        &self,
        address: impl Into<String>,
        data_center: impl Into<String>,
        rack: impl Into<String>,
        is_up: bool,
        schema_version: Option<Uuid>,
    ) {
        self.inner.lock().unwrap().peers.push(PeerInfo {
            address: address.into(),
            data_center: data_center.into(),
            rack: rack.into(),
            is_up,
            schema_version,
        });
    }

    /// Seed a migrations row, bypassing the gateway.
    pub fn seed_migration(&self, row: MigrationRow) {
        let key = (
            row.keyspace_name.clone(),
            row.service.clone(),
            row.file.clone(),
        );
        self.inner.lock().unwrap().migrations.insert(key, row);
    }

    // -- inspection ----------------------------------------------------------

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.inner.lock().unwrap().executed.clone()
    }

    pub fn migration_rows(&self) -> Vec<MigrationRow> {
        self.inner.lock().unwrap().migrations.values().cloned().collect()
    }

    /// Every write to the migrations table, in order.
    pub fn migration_saves(&self) -> Vec<MigrationRow> {
        self.inner.lock().unwrap().migration_saves.clone()
    }

    pub fn bootstrap_rows(&self) -> Vec<BootstrapRow> {
        self.inner.lock().unwrap().bootstraps.clone()
    }

    pub fn lock_holder(&self, name: &str) -> Option<Uuid> {
        self.inner.lock().unwrap().locks.get(name).copied()
    }

    /// How many schema-agreement probes have hit the local system table.
    pub fn agreement_probes(&self) -> u64 {
        self.inner.lock().unwrap().agreement_probes
    }
}

impl std::fmt::Debug for MemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCluster")
            .field("meta_keyspace", &self.meta_keyspace)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionFactory for MemoryCluster {
    async fn connect(&self, keyspace: Option<&str>) -> StateResult<Arc<dyn CqlSession>> {
        Ok(Arc::new(self.session(keyspace)) as Arc<dyn CqlSession>)
    }
}

/// One session against a [`MemoryCluster`].
pub struct MemorySession {
    keyspace: Option<String>,
    meta_keyspace: String,
    inner: Arc<Mutex<ClusterInner>>,
}

impl MemorySession {
    fn meta_table(&self, name: &str) -> String {
        format!("{}.{}", self.meta_keyspace, name)
    }
}

#[async_trait]
impl CqlSession for MemorySession {
    async fn execute(&self, statement: &Statement) -> StateResult<ResultSet> {
        let cql = statement.cql.trim();
        let mut inner = self.inner.lock().unwrap();

        if let Some(needle) = inner.failures.iter().find(|n| cql.contains(n.as_str())) {
            return Err(StateError::Statement {
                message: format!("injected failure on '{needle}'"),
            });
        }

        if let Some((columns, if_not_exists)) =
            parse_insert(cql, &self.meta_table(crate::store::LOCKS_TABLE))
        {
            return apply_lock_insert(&mut inner, &columns, if_not_exists, &statement.values);
        }
        if let Some((columns, _)) =
            parse_insert(cql, &self.meta_table(crate::store::MIGRATIONS_TABLE))
        {
            return apply_migration_insert(&mut inner, &columns, &statement.values);
        }
        if let Some((columns, _)) =
            parse_insert(cql, &self.meta_table(crate::store::BOOTSTRAPS_TABLE))
        {
            return apply_bootstrap_insert(&mut inner, &columns, &statement.values);
        }
        if cql.starts_with(&format!(
            "DELETE FROM {} WHERE name = ? IF client = ?",
            self.meta_table(crate::store::LOCKS_TABLE)
        )) {
            return apply_lock_delete(&mut inner, &statement.values);
        }
        if cql.contains("FROM system.local") {
            inner.agreement_probes += 1;
            let version = inner
                .local_schema_version
                .map(Value::Uuid)
                .unwrap_or(Value::Null);
            return Ok(ResultSet {
                rows: vec![Row::new(vec![version])],
            });
        }
        if cql.starts_with(&format!(
            "SELECT applied_on, checksum, success, body FROM {}",
            self.meta_table(crate::store::MIGRATIONS_TABLE)
        )) {
            return select_migration(&inner, &statement.values);
        }

        // Anything else is a script statement; accept it and log it.
        inner.executed.push(ExecutedStatement {
            keyspace: self.keyspace.clone(),
            cql: cql.to_string(),
        });
        Ok(ResultSet::empty())
    }

    async fn topology(&self) -> StateResult<ClusterTopology> {
        let mut inner = self.inner.lock().unwrap();
        let mut peers = inner.peers.clone();
        if inner.disagreement_probes > 0 {
            inner.disagreement_probes -= 1;
            peers.push(PeerInfo {
                address: "127.0.0.2".to_string(),
                data_center: "dc1".to_string(),
                rack: "rack1".to_string(),
                is_up: true,
                schema_version: Some(Uuid::new_v4()),
            });
        }
        Ok(ClusterTopology { peers })
    }
}

/// Match `INSERT INTO <table> (cols…) VALUES …`, returning the column list
/// and whether the statement is conditional.
fn parse_insert(cql: &str, table: &str) -> Option<(Vec<String>, bool)> {
    let rest = cql.strip_prefix("INSERT INTO ")?;
    let rest = rest.strip_prefix(table)?;
    if !rest.starts_with([' ', '(']) {
        return None;
    }
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    let columns = rest[open + 1..close]
        .split(',')
        .map(|c| c.trim().to_string())
        .collect();
    Some((columns, rest.contains(" IF NOT EXISTS")))
}

fn column_value(columns: &[String], values: &[Value], name: &str) -> Value {
    columns
        .iter()
        .position(|c| c == name)
        .and_then(|idx| values.get(idx))
        .cloned()
        .unwrap_or(Value::Null)
}

fn decode_error(context: &str) -> StateError {
    StateError::Decode {
        context: context.to_string(),
    }
}

fn apply_lock_insert(
    inner: &mut ClusterInner,
    columns: &[String],
    if_not_exists: bool,
    values: &[Value],
) -> StateResult<ResultSet> {
    let name = column_value(columns, values, "name")
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| decode_error("locks insert"))?;
    let client = column_value(columns, values, "client")
        .as_uuid()
        .ok_or_else(|| decode_error("locks insert"))?;

    if if_not_exists {
        if let Some(holder) = inner.locks.get(&name) {
            return Ok(ResultSet {
                rows: vec![Row::new(vec![Value::Boolean(false), Value::Uuid(*holder)])],
            });
        }
        inner.locks.insert(name, client);
        return Ok(ResultSet {
            rows: vec![Row::new(vec![Value::Boolean(true)])],
        });
    }
    inner.locks.insert(name, client);
    Ok(ResultSet::empty())
}

fn apply_lock_delete(inner: &mut ClusterInner, values: &[Value]) -> StateResult<ResultSet> {
    let name = values
        .first()
        .and_then(Value::as_text)
        .ok_or_else(|| decode_error("locks delete"))?;
    let client = values
        .get(1)
        .and_then(Value::as_uuid)
        .ok_or_else(|| decode_error("locks delete"))?;

    let applied = inner.locks.get(name) == Some(&client);
    if applied {
        inner.locks.remove(name);
    }
    Ok(ResultSet {
        rows: vec![Row::new(vec![Value::Boolean(applied)])],
    })
}

fn apply_migration_insert(
    inner: &mut ClusterInner,
    columns: &[String],
    values: &[Value],
) -> StateResult<ResultSet> {
    let keyspace_name = column_value(columns, values, "keyspace_name")
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| decode_error("migrations insert"))?;
    let service = column_value(columns, values, "service")
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| decode_error("migrations insert"))?;
    let file = column_value(columns, values, "file")
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| decode_error("migrations insert"))?;

    let row = MigrationRow {
        keyspace_name: keyspace_name.clone(),
        service: service.clone(),
        file: file.clone(),
        applied_on: column_value(columns, values, "applied_on").as_timestamp(),
        checksum: column_value(columns, values, "checksum")
            .as_text()
            .map(str::to_string),
        success: column_value(columns, values, "success")
            .as_bool()
            .unwrap_or(false),
        body: column_value(columns, values, "body")
            .as_text()
            .map(str::to_string),
    };
    inner.migration_saves.push(row.clone());
    inner
        .migrations
        .insert((keyspace_name, service, file), row);
    Ok(ResultSet::empty())
}

fn apply_bootstrap_insert(
    inner: &mut ClusterInner,
    columns: &[String],
    values: &[Value],
) -> StateResult<ResultSet> {
    let row = BootstrapRow {
        keyspace_name: column_value(columns, values, "keyspace_name")
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| decode_error("bootstraps insert"))?,
        applied_on: column_value(columns, values, "applied_on")
            .as_timestamp()
            .ok_or_else(|| decode_error("bootstraps insert"))?,
        file: column_value(columns, values, "file")
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| decode_error("bootstraps insert"))?,
        success: column_value(columns, values, "success")
            .as_bool()
            .unwrap_or(false),
        body: column_value(columns, values, "body")
            .as_text()
            .map(str::to_string)
            .unwrap_or_default(),
    };
    inner.bootstraps.push(row);
    Ok(ResultSet::empty())
}

fn select_migration(inner: &ClusterInner, values: &[Value]) -> StateResult<ResultSet> {
    let keyspace = values
        .first()
        .and_then(Value::as_text)
        .ok_or_else(|| decode_error("migrations select"))?;
    let service = values
        .get(1)
        .and_then(Value::as_text)
        .ok_or_else(|| decode_error("migrations select"))?;
    let file = values
        .get(2)
        .and_then(Value::as_text)
        .ok_or_else(|| decode_error("migrations select"))?;

    let key = (
        keyspace.to_string(),
        service.to_string(),
        file.to_string(),
    );
    let rows = match inner.migrations.get(&key) {
        Some(row) => vec![Row::new(vec![
            row.applied_on.map(Value::Timestamp).unwrap_or(Value::Null),
            row.checksum.clone().map(Value::Text).unwrap_or(Value::Null),
            Value::Boolean(row.success),
            row.body.clone().map(Value::Text).unwrap_or(Value::Null),
        ])],
        None => Vec::new(),
    };
    Ok(ResultSet { rows })
}
