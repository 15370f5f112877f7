//! Common fixtures for orchestrator tests.

use cqldrift_core::MigrateConfig;
use cqldrift_state::{MemoryCluster, SessionRegistry};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const INIT_SCRIPT: &str = "\
CREATE KEYSPACE IF NOT EXISTS cqldrift \
  WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1};
CREATE TABLE IF NOT EXISTS cqldrift.locks (name text PRIMARY KEY, client uuid);
CREATE TABLE IF NOT EXISTS cqldrift.migrations (
  keyspace_name text, service text, file text,
  applied_on timestamp, checksum text, success boolean, body text,
  PRIMARY KEY ((keyspace_name), service, file));
CREATE TABLE IF NOT EXISTS cqldrift.bootstraps (
  keyspace_name text, applied_on timestamp, file text, success boolean, body text,
  PRIMARY KEY ((keyspace_name), applied_on));
";

/// Write one file below the root, creating parent directories.
pub fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Two keyspaces, each with a bootstrap and one service of two migrations.
pub fn two_keyspace_tree(root: &Path) {
    write(root, "cqlmigrate.cql", INIT_SCRIPT);
    write(root, "events/bootstrap.cql", "CREATE KEYSPACE IF NOT EXISTS events;");
    write(root, "events/ingest/001-table.cql", "CREATE TABLE events.raw (id uuid PRIMARY KEY);");
    write(root, "events/ingest/002-index.cql", "CREATE INDEX raw_idx ON events.raw (id);");
    write(root, "billing/bootstrap.cql", "CREATE KEYSPACE IF NOT EXISTS billing;");
    write(root, "billing/invoices/001-table.cql", "CREATE TABLE billing.inv (id uuid PRIMARY KEY);");
    write(root, "billing/invoices/002-alter.cql", "ALTER TABLE billing.inv ADD total int;");
}

/// A fresh simulated cluster plus a registry and config over a tempdir.
pub struct Harness {
    pub temp: TempDir,
    pub cluster: MemoryCluster,
    pub config: MigrateConfig,
    pub registry: Arc<SessionRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let config = MigrateConfig::for_testing(temp.path());
        let cluster = MemoryCluster::new(&config.meta_keyspace);
        let registry = Arc::new(SessionRegistry::new(Arc::new(cluster.clone())));
        Self {
            temp,
            cluster,
            config,
            registry,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// A second registry over the same cluster, as another process would
    /// hold.
    pub fn second_registry(&self) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(Arc::new(self.cluster.clone())))
    }
}
