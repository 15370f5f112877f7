//! Script variants and the shared apply protocol.
//!
//! The three script roles share a statement-execution routine but differ in
//! persistence: the init script is never recorded, bootstraps append one
//! attempt row per run, and migrations are written twice per apply so a
//! crash mid-apply leaves a visible `success = false` marker.

use crate::error::{EngineError, EngineResult};
use cqldrift_core::{statements, Checksum};
use cqldrift_state::{BootstrapRow, CqlSession, MigrationRow, StateStore, Statement};
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

/// Execute a canonical body statement by statement, sequentially and in
/// order. The first failing segment aborts the script.
pub async fn run_statements(
    session: &dyn CqlSession,
    canonical: &str,
    timeout: Duration,
) -> EngineResult<()> {
    for cql in statements(canonical) {
        let statement = Statement::new(cql).with_timeout(timeout);
        session.execute(&statement).await?;
    }
    Ok(())
}

/// The depth-0 script that creates the tool's keyspace and metadata tables.
/// Runs before the lock exists, so it must be idempotent; it is never
/// recorded in the state store.
#[derive(Debug, Clone)]
pub struct InitScript {
    pub path: PathBuf,
    /// Canonical body.
    pub body: String,
}

impl InitScript {
    pub async fn apply(&self, session: &dyn CqlSession, timeout: Duration) -> EngineResult<()> {
        run_statements(session, &self.body, timeout).await
    }
}

/// A per-keyspace setup script, re-applied on every run. No checksum and no
/// skip logic; every attempt appends its own row.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub keyspace: String,
    pub file: String,
    /// Canonical body.
    pub body: String,
    pub applied_on: Option<OffsetDateTime>,
}

impl Bootstrap {
    pub fn new(keyspace: String, file: String, body: String) -> Self {
        Self {
            keyspace,
            file,
            body,
            applied_on: None,
        }
    }

    /// Execute the script, then record the attempt. A failed execution is
    /// recorded too, with `success = false`, before the error propagates.
    pub async fn apply(
        &mut self,
        store: &StateStore,
        session: &dyn CqlSession,
        timeout: Duration,
    ) -> EngineResult<()> {
        let applied_on = OffsetDateTime::now_utc();
        self.applied_on = Some(applied_on);

        let outcome = run_statements(session, &self.body, timeout).await;
        let row = BootstrapRow {
            keyspace_name: self.keyspace.clone(),
            applied_on,
            file: self.file.clone(),
            success: outcome.is_ok(),
            body: self.body.clone(),
        };
        match (&outcome, store.append_bootstrap(&row).await) {
            (_, Ok(())) => {}
            (Ok(()), Err(e)) => return Err(e.into()),
            (Err(_), Err(e)) => {
                // The statement failure is the primary error.
                tracing::warn!(
                    keyspace = %self.keyspace,
                    file = %self.file,
                    error = %e,
                    "Could not record failed bootstrap attempt"
                );
            }
        }
        outcome
    }
}

/// What a migration apply did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The script ran and its row now reads `success = true`.
    Applied,
    /// A prior successful row with a matching checksum was found; nothing
    /// was written.
    Skipped,
}

/// A per-(keyspace, service) migration, hydrated from disk and from any
/// prior row in the migrations table.
#[derive(Debug, Clone)]
pub struct Migration {
    pub keyspace: String,
    pub service: String,
    pub file: String,
    /// Canonical body.
    pub body: String,
    /// Digest of the canonical body.
    pub checksum: Checksum,
    prior: Option<MigrationRow>,
    pub applied_on: Option<OffsetDateTime>,
    pub success: bool,
}

impl Migration {
    pub fn new(keyspace: String, service: String, file: String, body: String) -> Self {
        let checksum = Checksum::compute(&body);
        Self {
            keyspace,
            service,
            file,
            body,
            checksum,
            prior: None,
            applied_on: None,
            success: false,
        }
    }

    /// Attach the persisted state loaded for these coordinates.
    pub fn hydrate(&mut self, row: MigrationRow) {
        self.prior = Some(row);
    }

    /// Whether the persisted state marks a started-but-unfinished apply.
    /// Terminal: the run must refuse before any apply.
    pub fn is_failed(&self) -> bool {
        self.prior
            .as_ref()
            .is_some_and(|row| !row.success && row.applied_on.is_some())
    }

    fn row(&self, success: bool) -> MigrationRow {
        MigrationRow {
            keyspace_name: self.keyspace.clone(),
            service: self.service.clone(),
            file: self.file.clone(),
            applied_on: self.applied_on,
            checksum: Some(self.checksum.to_hex()),
            success,
            body: Some(self.body.clone()),
        }
    }

    /// Apply this migration.
    ///
    /// A prior successful row short-circuits to a checksum verification:
    /// mismatch is fatal, match is a skip. Otherwise the row is written with
    /// `success = false` before the statements run and rewritten with
    /// `success = true` after, so a crash in between leaves the intent
    /// marker behind.
    pub async fn apply(
        &mut self,
        store: &StateStore,
        session: &dyn CqlSession,
        timeout: Duration,
    ) -> EngineResult<ApplyOutcome> {
        if let Some(prior) = &self.prior {
            if prior.success {
                let stored = prior.checksum.clone().unwrap_or_default();
                if !self.checksum.matches_hex(&stored) {
                    return Err(EngineError::ChecksumMismatch {
                        keyspace: self.keyspace.clone(),
                        service: self.service.clone(),
                        file: self.file.clone(),
                        stored,
                        computed: self.checksum.to_hex(),
                    });
                }
                tracing::debug!(
                    keyspace = %self.keyspace,
                    service = %self.service,
                    file = %self.file,
                    "Already applied, skipping"
                );
                return Ok(ApplyOutcome::Skipped);
            }
            if prior.applied_on.is_some() {
                // Discovery refuses these before scheduling; guard anyway.
                return Err(EngineError::FailedMigration {
                    keyspace: self.keyspace.clone(),
                    service: self.service.clone(),
                    file: self.file.clone(),
                });
            }
        }

        self.applied_on = Some(OffsetDateTime::now_utc());
        store.save_migration(&self.row(false)).await?;

        run_statements(session, &self.body, timeout).await?;

        self.applied_on = Some(OffsetDateTime::now_utc());
        store.save_migration(&self.row(true)).await?;
        self.success = true;
        Ok(ApplyOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqldrift_core::canonicalize;
    use cqldrift_state::{MemoryCluster, SessionRegistry};
    use std::sync::Arc;

    fn store_over(cluster: &MemoryCluster) -> StateStore {
        let registry = Arc::new(SessionRegistry::new(Arc::new(cluster.clone())));
        StateStore::new(
            registry,
            "cqldrift",
            Duration::from_secs(5),
            Duration::from_millis(5),
        )
    }

    fn migration(body: &str) -> Migration {
        Migration::new(
            "events".to_string(),
            "ingest".to_string(),
            "001-create.cql".to_string(),
            canonicalize(body).unwrap(),
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn run_statements_executes_segments_in_order() {
        let cluster = MemoryCluster::new("cqldrift");
        let session = cluster.session(Some("events"));

        run_statements(
            &session,
            "CREATE TABLE a ( x int ) ; ; INSERT INTO a ( x ) VALUES ( 1 ) ;",
            TIMEOUT,
        )
        .await
        .unwrap();

        let executed: Vec<String> = cluster.executed().into_iter().map(|s| s.cql).collect();
        assert_eq!(
            executed,
            vec![
                "CREATE TABLE a ( x int )".to_string(),
                "INSERT INTO a ( x ) VALUES ( 1 )".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn apply_writes_intent_then_success() {
        let cluster = MemoryCluster::new("cqldrift");
        let store = store_over(&cluster);
        let session = cluster.session(Some("events"));

        let mut m = migration("CREATE TABLE events.t (x int);");
        let outcome = m.apply(&store, &session, TIMEOUT).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert!(m.success);

        let saves = cluster.migration_saves();
        assert_eq!(saves.len(), 2);
        assert!(!saves[0].success);
        assert!(saves[1].success);
        assert_eq!(saves[0].checksum, saves[1].checksum);
        assert!(cluster.migration_rows()[0].success);
    }

    #[tokio::test]
    async fn failed_statement_leaves_intent_marker() {
        let cluster = MemoryCluster::new("cqldrift");
        let store = store_over(&cluster);
        let session = cluster.session(Some("events"));
        cluster.fail_matching("broken");

        let mut m = migration("CREATE TABLE events.broken (x int);");
        assert!(m.apply(&store, &session, TIMEOUT).await.is_err());

        let rows = cluster.migration_rows();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
        assert!(rows[0].applied_on.is_some());
    }

    #[tokio::test]
    async fn matching_prior_row_skips_without_touching_the_cluster() {
        let cluster = MemoryCluster::new("cqldrift");
        let store = store_over(&cluster);
        let session = cluster.session(Some("events"));

        let mut first = migration("CREATE TABLE events.t (x int);");
        first.apply(&store, &session, TIMEOUT).await.unwrap();
        let statements_before = cluster.executed().len();
        let saves_before = cluster.migration_saves().len();

        // Same canonical body through different layout.
        let mut second = migration("-- note\nCREATE   TABLE events.t (x int);");
        second.hydrate(
            store
                .find_migration("events", "ingest", "001-create.cql")
                .await
                .unwrap()
                .unwrap(),
        );
        let outcome = second.apply(&store, &session, TIMEOUT).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);
        assert_eq!(cluster.executed().len(), statements_before);
        assert_eq!(cluster.migration_saves().len(), saves_before);
    }

    #[tokio::test]
    async fn changed_body_fails_checksum_before_executing() {
        let cluster = MemoryCluster::new("cqldrift");
        let store = store_over(&cluster);
        let session = cluster.session(Some("events"));

        let mut first = migration("CREATE TABLE events.t (x int);");
        first.apply(&store, &session, TIMEOUT).await.unwrap();
        let statements_before = cluster.executed().len();

        let mut second = migration("CREATE TABLE events.t (x int, y int);");
        second.hydrate(
            store
                .find_migration("events", "ingest", "001-create.cql")
                .await
                .unwrap()
                .unwrap(),
        );
        let err = second.apply(&store, &session, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, EngineError::ChecksumMismatch { .. }));
        assert_eq!(cluster.executed().len(), statements_before);
    }

    #[tokio::test]
    async fn bootstrap_records_failed_attempts_too() {
        let cluster = MemoryCluster::new("cqldrift");
        let store = store_over(&cluster);
        let session = cluster.session(None);
        cluster.fail_matching("KEYSPACE broken");

        let mut ok = Bootstrap::new(
            "events".to_string(),
            "bootstrap.cql".to_string(),
            canonicalize("CREATE KEYSPACE events;").unwrap(),
        );
        ok.apply(&store, &session, TIMEOUT).await.unwrap();

        let mut bad = Bootstrap::new(
            "broken".to_string(),
            "bootstrap.cql".to_string(),
            canonicalize("CREATE KEYSPACE broken;").unwrap(),
        );
        assert!(bad.apply(&store, &session, TIMEOUT).await.is_err());

        let rows = cluster.bootstrap_rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.keyspace_name == "events" && r.success));
        assert!(rows.iter().any(|r| r.keyspace_name == "broken" && !r.success));
    }
}
