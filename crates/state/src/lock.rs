//! Distributed mutual-exclusion lock built from conditional writes.
//!
//! The lock is one conditional row in the `locks` table. A conditional
//! insert claims it cluster-wide; the release deletes it only if the row
//! still names this process's client id, so a stale run can never clear a
//! newer owner's lock.

use crate::store::StateStore;
use uuid::Uuid;

/// Default lock name shared by every orchestrator run.
pub const MIGRATION_LOCK: &str = "MIGRATION_LOCK";

/// Process-scoped lock handle. Acquired at most once; released on every
/// termination path.
#[derive(Debug, Clone)]
pub struct MigrationLock {
    name: String,
    client: Uuid,
}

impl MigrationLock {
    /// A lock on the default name with a fresh random client id.
    pub fn new() -> Self {
        Self::with_name(MIGRATION_LOCK)
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: Uuid::new_v4(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> Uuid {
        self.client
    }

    /// Try to claim the lock. Driver-level errors count as acquisition
    /// failure rather than propagating.
    pub async fn acquire(&self, store: &StateStore) -> bool {
        match store.insert_lock(&self.name, self.client).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(lock = %self.name, error = %e, "Lock acquisition errored");
                false
            }
        }
    }

    /// Release the lock if we still own it. Returns false if another client
    /// holds it, the row is gone, or the delete errored.
    pub async fn release(&self, store: &StateStore) -> bool {
        match store.delete_lock(&self.name, self.client).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(lock = %self.name, error = %e, "Lock release errored");
                false
            }
        }
    }
}

impl Default for MigrationLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StateError, StateResult};
    use crate::session::{
        ClusterTopology, CqlSession, ResultSet, SessionFactory, SessionRegistry, Statement,
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct FailingSession;

    #[async_trait]
    impl CqlSession for FailingSession {
        async fn execute(&self, _statement: &Statement) -> StateResult<ResultSet> {
            Err(StateError::Statement {
                message: "connection reset".to_string(),
            })
        }

        async fn topology(&self) -> StateResult<ClusterTopology> {
            Ok(ClusterTopology::default())
        }
    }

    struct FailingFactory;

    #[async_trait]
    impl SessionFactory for FailingFactory {
        async fn connect(&self, _keyspace: Option<&str>) -> StateResult<Arc<dyn CqlSession>> {
            Ok(Arc::new(FailingSession) as Arc<dyn CqlSession>)
        }
    }

    #[tokio::test]
    async fn driver_errors_are_swallowed_as_failure() {
        let registry = Arc::new(SessionRegistry::new(Arc::new(FailingFactory)));
        let store = StateStore::new(
            registry,
            "cqldrift",
            Duration::from_secs(1),
            Duration::from_millis(5),
        );
        let lock = MigrationLock::new();
        assert!(!lock.acquire(&store).await);
        assert!(!lock.release(&store).await);
    }

    #[test]
    fn each_lock_draws_a_fresh_client_id() {
        assert_ne!(MigrationLock::new().client(), MigrationLock::new().client());
    }
}
