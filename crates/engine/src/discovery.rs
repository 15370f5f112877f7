//! Script discovery.
//!
//! Walks the migration root, classifies `.cql` files by depth, loads and
//! canonicalizes their bodies, and hydrates migrations from the state store.
//! A persisted `success = false` row with a non-null `applied_on` aborts the
//! whole run here, before anything is applied.

use crate::error::{EngineError, EngineResult};
use crate::scheduler::ServiceQueues;
use crate::scripts::{Bootstrap, InitScript, Migration};
use cqldrift_core::{canonicalize, classify, Checksum, MigrateConfig, ScriptKind};
use cqldrift_state::StateStore;
use std::path::{Path, PathBuf};

/// Everything below the root: bootstraps in a flat list, migrations grouped
/// into per-(keyspace, service) queues.
#[derive(Debug)]
pub struct Discovered {
    pub bootstraps: Vec<Bootstrap>,
    pub queues: ServiceQueues,
}

/// One script as seen by offline validation: coordinates, digest, statement
/// count.
#[derive(Debug, Clone)]
pub struct ScannedScript {
    pub relative_path: PathBuf,
    pub kind: ScriptKind,
    pub checksum: Checksum,
    pub statement_count: usize,
}

/// Load and canonicalize the depth-0 init script.
pub fn load_init(config: &MigrateConfig) -> EngineResult<InitScript> {
    let path = config.root.join(&config.init_filename);
    if !path.is_file() {
        return Err(EngineError::InitMissing { path });
    }
    let body = read_canonical(&path)?;
    Ok(InitScript { path, body })
}

/// Walk the root and build the run's bootstrap list and migration queues,
/// hydrating each migration from the state store.
pub async fn discover(config: &MigrateConfig, store: &StateStore) -> EngineResult<Discovered> {
    let mut bootstraps = Vec::new();
    let mut queues = ServiceQueues::new();

    for relative in walk(&config.root)? {
        let Some(kind) = classify(&relative, &config.init_filename, &config.bootstrap_filename)
        else {
            continue;
        };
        match kind {
            // Loaded separately, before the lock is taken.
            ScriptKind::Init => {}
            ScriptKind::Bootstrap { keyspace } => {
                let body = read_canonical(&config.root.join(&relative))?;
                let file = relative
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default();
                bootstraps.push(Bootstrap::new(keyspace, file, body));
            }
            ScriptKind::Migration {
                keyspace,
                service,
                file,
            } => {
                let body = read_canonical(&config.root.join(&relative))?;
                let mut migration = Migration::new(keyspace, service, file, body);
                if let Some(row) = store
                    .find_migration(&migration.keyspace, &migration.service, &migration.file)
                    .await?
                {
                    migration.hydrate(row);
                }
                if migration.is_failed() {
                    return Err(EngineError::FailedMigration {
                        keyspace: migration.keyspace,
                        service: migration.service,
                        file: migration.file,
                    });
                }
                queues.push(migration);
            }
        }
    }

    tracing::info!(
        bootstraps = bootstraps.len(),
        services = queues.stream_count(),
        migrations = queues.len(),
        "Discovery complete"
    );
    Ok(Discovered { bootstraps, queues })
}

/// Offline scan: classify, canonicalize, and checksum every script under the
/// root without consulting the state store.
pub fn scan(config: &MigrateConfig) -> EngineResult<Vec<ScannedScript>> {
    let mut scripts = Vec::new();
    for relative in walk(&config.root)? {
        let Some(kind) = classify(&relative, &config.init_filename, &config.bootstrap_filename)
        else {
            continue;
        };
        let body = read_canonical(&config.root.join(&relative))?;
        scripts.push(ScannedScript {
            kind,
            checksum: Checksum::compute(&body),
            statement_count: cqldrift_core::statements(&body).count(),
            relative_path: relative,
        });
    }
    Ok(scripts)
}

/// Collect regular files under `root` as sorted root-relative paths. Sorting
/// is byte order, which is also the migration order within a service.
fn walk(root: &Path) -> EngineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_into(root, Path::new(""), &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_into(root: &Path, relative: &Path, files: &mut Vec<PathBuf>) -> EngineResult<()> {
    let dir = root.join(relative);
    let entries = std::fs::read_dir(&dir).map_err(|source| EngineError::Io {
        path: dir.clone(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| EngineError::Io {
            path: dir.clone(),
            source,
        })?;
        let child = relative.join(entry.file_name());
        let file_type = entry.file_type().map_err(|source| EngineError::Io {
            path: root.join(&child),
            source,
        })?;
        if file_type.is_dir() {
            walk_into(root, &child, files)?;
        } else if file_type.is_file() {
            files.push(child);
        }
    }
    Ok(())
}

fn read_canonical(path: &Path) -> EngineResult<String> {
    let raw = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    canonicalize(&raw).map_err(|source| EngineError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqldrift_state::{MemoryCluster, MigrationRow, SessionRegistry};
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn store_over(cluster: &MemoryCluster, config: &MigrateConfig) -> StateStore {
        let registry = Arc::new(SessionRegistry::new(Arc::new(cluster.clone())));
        StateStore::from_config(config, registry)
    }

    fn sample_tree(root: &Path) {
        write(root, "cqlmigrate.cql", "CREATE KEYSPACE cqldrift;");
        write(root, "events/bootstrap.cql", "CREATE KEYSPACE events;");
        write(root, "events/ingest/002-index.cql", "CREATE INDEX i ON t (x);");
        write(root, "events/ingest/001-table.cql", "CREATE TABLE t (x int);");
        write(root, "events/ingest/notes.txt", "not a script");
        write(root, "orphan.cql", "ignored at depth 0");
    }

    #[tokio::test]
    async fn discovers_and_orders_scripts() {
        let temp = tempfile::tempdir().unwrap();
        sample_tree(temp.path());
        let config = MigrateConfig::for_testing(temp.path());
        let cluster = MemoryCluster::new("cqldrift");
        let store = store_over(&cluster, &config);

        let discovered = discover(&config, &store).await.unwrap();
        assert_eq!(discovered.bootstraps.len(), 1);
        assert_eq!(discovered.queues.len(), 2);
        assert_eq!(discovered.queues.stream_count(), 1);

        let mut queues = discovered.queues;
        let round = queues.next_round();
        assert_eq!(round[0].file, "001-table.cql");
    }

    #[tokio::test]
    async fn failed_row_aborts_discovery() {
        let temp = tempfile::tempdir().unwrap();
        sample_tree(temp.path());
        let config = MigrateConfig::for_testing(temp.path());
        let cluster = MemoryCluster::new("cqldrift");
        cluster.seed_migration(MigrationRow {
            keyspace_name: "events".to_string(),
            service: "ingest".to_string(),
            file: "001-table.cql".to_string(),
            applied_on: Some(OffsetDateTime::now_utc()),
            checksum: None,
            success: false,
            body: None,
        });
        let store = store_over(&cluster, &config);

        let err = discover(&config, &store).await.unwrap_err();
        assert!(matches!(err, EngineError::FailedMigration { .. }));
    }

    #[test]
    fn load_init_requires_the_file() {
        let temp = tempfile::tempdir().unwrap();
        let config = MigrateConfig::for_testing(temp.path());
        assert!(matches!(
            load_init(&config).unwrap_err(),
            EngineError::InitMissing { .. }
        ));

        write(temp.path(), "cqlmigrate.cql", "CREATE KEYSPACE cqldrift;");
        let init = load_init(&config).unwrap();
        assert_eq!(init.body, "CREATE KEYSPACE cqldrift ;");
    }

    #[test]
    fn scan_reports_checksums_offline() {
        let temp = tempfile::tempdir().unwrap();
        sample_tree(temp.path());
        let config = MigrateConfig::for_testing(temp.path());

        let scripts = scan(&config).unwrap();
        // init + bootstrap + two migrations; notes.txt and orphan.cql ignored.
        assert_eq!(scripts.len(), 4);
        assert!(scripts.iter().all(|s| s.statement_count == 1));
    }
}
