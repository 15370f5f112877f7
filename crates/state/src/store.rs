//! Metadata gateway: typed operations over the tool's own tables plus the
//! cluster schema-agreement probe.
//!
//! Every statement the gateway emits is built here, so the in-memory cluster
//! and any driver adapter see one fixed statement vocabulary.

use crate::error::{StateError, StateResult};
use crate::models::{BootstrapRow, MigrationRow};
use crate::session::{CqlSession, ResultSet, SessionRegistry, Statement, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Table names inside the metadata keyspace.
pub const LOCKS_TABLE: &str = "locks";
pub const MIGRATIONS_TABLE: &str = "migrations";
pub const BOOTSTRAPS_TABLE: &str = "bootstraps";

/// Typed gateway over the metadata keyspace.
pub struct StateStore {
    registry: Arc<SessionRegistry>,
    meta_keyspace: String,
    client_timeout: Duration,
    agreement_poll: Duration,
}

impl StateStore {
    pub fn new(
        registry: Arc<SessionRegistry>,
        meta_keyspace: impl Into<String>,
        client_timeout: Duration,
        agreement_poll: Duration,
    ) -> Self {
        Self {
            registry,
            meta_keyspace: meta_keyspace.into(),
            client_timeout,
            agreement_poll,
        }
    }

    /// Build a `StateStore` from run configuration.
    pub fn from_config(
        config: &cqldrift_core::MigrateConfig,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self::new(
            registry,
            config.meta_keyspace.clone(),
            config.client_timeout(),
            config.agreement_poll(),
        )
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.meta_keyspace, name)
    }

    async fn admin(&self) -> StateResult<Arc<dyn CqlSession>> {
        self.registry.admin().await
    }

    /// Execute an arbitrary statement on the admin session.
    pub async fn execute(&self, statement: &Statement) -> StateResult<ResultSet> {
        self.admin().await?.execute(statement).await
    }

    /// Generic row insert: builds `INSERT INTO t (cols) VALUES (?…)
    /// [IF NOT EXISTS] [USING TTL n]` from the given columns, skipping null
    /// values. An all-null record is an error.
    pub async fn insert_row(
        &self,
        table: &str,
        columns: &[(&str, Value)],
        if_not_exists: bool,
        ttl: Option<u32>,
    ) -> StateResult<ResultSet> {
        let present: Vec<&(&str, Value)> =
            columns.iter().filter(|(_, value)| !value.is_null()).collect();
        if present.is_empty() {
            return Err(StateError::EmptyRecord {
                table: table.to_string(),
            });
        }

        let names: Vec<&str> = present.iter().map(|(name, _)| *name).collect();
        let marks = vec!["?"; present.len()].join(", ");
        let mut cql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            marks
        );
        if if_not_exists {
            cql.push_str(" IF NOT EXISTS");
        }
        if let Some(ttl) = ttl {
            cql.push_str(&format!(" USING TTL {ttl}"));
        }

        let values = present.iter().map(|(_, value)| value.clone()).collect();
        let statement = Statement::new(cql)
            .with_values(values)
            .with_timeout(self.client_timeout);
        self.execute(&statement).await
    }

    // =========================================================================
    // locks
    // =========================================================================

    /// Conditionally claim a lock row. Returns whether the write was applied.
    pub async fn insert_lock(&self, name: &str, client: Uuid) -> StateResult<bool> {
        let result = self
            .insert_row(
                &self.table(LOCKS_TABLE),
                &[
                    ("name", Value::Text(name.to_string())),
                    ("client", Value::Uuid(client)),
                ],
                true,
                None,
            )
            .await?;
        Ok(result.was_applied())
    }

    /// Delete a lock row if still owned by `client`. Returns whether the
    /// delete was applied.
    pub async fn delete_lock(&self, name: &str, client: Uuid) -> StateResult<bool> {
        let statement = Statement::new(format!(
            "DELETE FROM {} WHERE name = ? IF client = ?",
            self.table(LOCKS_TABLE)
        ))
        .with_values(vec![
            Value::Text(name.to_string()),
            Value::Uuid(client),
        ])
        .with_timeout(self.client_timeout);
        Ok(self.execute(&statement).await?.was_applied())
    }

    // =========================================================================
    // migrations
    // =========================================================================

    /// Fetch the persisted state of one migration, if any.
    pub async fn find_migration(
        &self,
        keyspace: &str,
        service: &str,
        file: &str,
    ) -> StateResult<Option<MigrationRow>> {
        let statement = Statement::new(format!(
            "SELECT applied_on, checksum, success, body FROM {} \
             WHERE keyspace_name = ? AND service = ? AND file = ?",
            self.table(MIGRATIONS_TABLE)
        ))
        .with_values(vec![
            Value::Text(keyspace.to_string()),
            Value::Text(service.to_string()),
            Value::Text(file.to_string()),
        ])
        .with_timeout(self.client_timeout);

        let result = self.execute(&statement).await?;
        let Some(row) = result.rows.first() else {
            return Ok(None);
        };
        let success = match row.get(2) {
            Some(Value::Boolean(b)) => *b,
            Some(Value::Null) | None => false,
            _ => {
                return Err(StateError::Decode {
                    context: format!("{} row", MIGRATIONS_TABLE),
                })
            }
        };
        Ok(Some(MigrationRow {
            keyspace_name: keyspace.to_string(),
            service: service.to_string(),
            file: file.to_string(),
            applied_on: row.get(0).and_then(Value::as_timestamp),
            checksum: row.get(1).and_then(Value::as_text).map(str::to_string),
            success,
            body: row.get(3).and_then(Value::as_text).map(str::to_string),
        }))
    }

    /// Upsert a migration row. The same coordinates are written twice per
    /// apply: once as the crash-intent marker, once as the success record.
    pub async fn save_migration(&self, row: &MigrationRow) -> StateResult<()> {
        self.insert_row(
            &self.table(MIGRATIONS_TABLE),
            &[
                ("keyspace_name", Value::Text(row.keyspace_name.clone())),
                ("service", Value::Text(row.service.clone())),
                ("file", Value::Text(row.file.clone())),
                (
                    "applied_on",
                    row.applied_on.map(Value::Timestamp).unwrap_or(Value::Null),
                ),
                (
                    "checksum",
                    row.checksum.clone().map(Value::Text).unwrap_or(Value::Null),
                ),
                ("success", Value::Boolean(row.success)),
                (
                    "body",
                    row.body.clone().map(Value::Text).unwrap_or(Value::Null),
                ),
            ],
            false,
            None,
        )
        .await?;
        Ok(())
    }

    // =========================================================================
    // bootstraps
    // =========================================================================

    /// Append one bootstrap attempt. `applied_on` is a clustering column, so
    /// every attempt lands as its own row.
    pub async fn append_bootstrap(&self, row: &BootstrapRow) -> StateResult<()> {
        self.insert_row(
            &self.table(BOOTSTRAPS_TABLE),
            &[
                ("keyspace_name", Value::Text(row.keyspace_name.clone())),
                ("applied_on", Value::Timestamp(row.applied_on)),
                ("file", Value::Text(row.file.clone())),
                ("success", Value::Boolean(row.success)),
                ("body", Value::Text(row.body.clone())),
            ],
            false,
            None,
        )
        .await?;
        Ok(())
    }

    // =========================================================================
    // schema agreement
    // =========================================================================

    /// Whether every node the driver knows reports one schema version.
    ///
    /// The local version comes from the node-local system table; peers come
    /// from the driver's topology view. A peer that is not up still counts
    /// against agreement and is warned about.
    pub async fn check_schema_agreement(&self) -> StateResult<bool> {
        let admin = self.admin().await?;
        let statement = Statement::new(
            "SELECT schema_version FROM system.local WHERE key = 'local'",
        )
        .with_timeout(self.client_timeout);
        let result = admin.execute(&statement).await?;
        let local = result
            .rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_uuid);
        let Some(local) = local else {
            return Ok(false);
        };

        let mut versions: HashSet<Uuid> = HashSet::new();
        versions.insert(local);
        for peer in admin.topology().await?.peers {
            if !peer.is_up {
                tracing::warn!(
                    address = %peer.address,
                    data_center = %peer.data_center,
                    rack = %peer.rack,
                    "Peer is down; its last reported schema version still counts \
                     against agreement"
                );
            }
            if let Some(version) = peer.schema_version {
                versions.insert(version);
            }
        }
        Ok(versions.len() <= 1)
    }

    /// Block until the cluster agrees on one schema version.
    ///
    /// Polls at the configured interval with no overall timeout; probe
    /// errors are logged and retried.
    pub async fn await_schema_agreement(&self) {
        loop {
            match self.check_schema_agreement().await {
                Ok(true) => return,
                Ok(false) => {
                    tracing::debug!("Cluster schema versions still divergent");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Schema-agreement probe failed, retrying");
                }
            }
            tokio::time::sleep(self.agreement_poll).await;
        }
    }
}
