//! Top-level run lifecycle.
//!
//! ```text
//! START → INIT → LOCKING → LOADING → BOOTSTRAPPING → MIGRATING → RELEASING → EXIT(code)
//! ```
//!
//! The init script runs before the lock exists, so init failures exit
//! without a release. Everything between acquire and release funnels into
//! one result so the release happens on every path. A failed release does
//! not exit at all: the lingering process is the operator's signal.

use crate::discovery;
use crate::error::EngineResult;
use crate::scheduler::{MigrationStats, Scheduler};
use cqldrift_core::MigrateConfig;
use cqldrift_state::{MigrationLock, SessionRegistry, StateStore};
use std::sync::Arc;

/// How the process should end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Exit with this code.
    Exit(i32),
    /// Do not call exit: the lock could not be released and the lingering
    /// state is deliberate. A `manual_recovery_required` marker has been
    /// logged for supervision systems.
    Linger,
}

/// One migration run over a session registry.
pub struct Orchestrator {
    config: MigrateConfig,
    registry: Arc<SessionRegistry>,
    store: StateStore,
    lock: MigrationLock,
}

impl Orchestrator {
    pub fn new(config: MigrateConfig, registry: Arc<SessionRegistry>) -> Self {
        let store = StateStore::from_config(&config, registry.clone());
        Self {
            config,
            registry,
            store,
            lock: MigrationLock::new(),
        }
    }

    /// Run the full lifecycle and report how to terminate.
    pub async fn run(&mut self) -> ExitDisposition {
        // INIT: before the lock, so failures exit without a release.
        let init = match discovery::load_init(&self.config) {
            Ok(init) => init,
            Err(e) => {
                tracing::error!(error = %e, "Init script could not be loaded");
                return ExitDisposition::Exit(1);
            }
        };
        let admin = match self.registry.admin().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Could not open admin session");
                return ExitDisposition::Exit(1);
            }
        };
        if let Err(e) = init
            .apply(admin.as_ref(), self.config.client_timeout())
            .await
        {
            tracing::error!(error = %e, path = %init.path.display(), "Init script failed");
            return ExitDisposition::Exit(1);
        }

        // LOCKING: a refused acquire exits without a release, we never held it.
        if !self.lock.acquire(&self.store).await {
            tracing::error!(client = %self.lock.client(), "Failed to acquire lock");
            return ExitDisposition::Exit(1);
        }
        tracing::info!(client = %self.lock.client(), "Migration lock acquired");

        let code = match self.run_locked().await {
            Ok(stats) => {
                tracing::info!(
                    rounds = stats.rounds,
                    applied = stats.applied,
                    skipped = stats.skipped,
                    "Migration run complete"
                );
                0
            }
            Err(e) => {
                tracing::error!(error = %e, "Migration run failed");
                1
            }
        };

        // RELEASING
        if self.lock.release(&self.store).await {
            ExitDisposition::Exit(code)
        } else {
            tracing::error!(
                marker = "manual_recovery_required",
                lock = %self.lock.name(),
                client = %self.lock.client(),
                "Failed to release migration lock, manual recovery may be required"
            );
            ExitDisposition::Linger
        }
    }

    /// LOADING, BOOTSTRAPPING, MIGRATING — everything that happens under the
    /// lock.
    async fn run_locked(&self) -> EngineResult<MigrationStats> {
        let discovered = discovery::discover(&self.config, &self.store).await?;
        let scheduler = Scheduler::new(&self.store, &self.registry, self.config.client_timeout());
        scheduler.run_bootstraps(discovered.bootstraps).await?;
        scheduler.run_migrations(discovered.queues).await
    }
}
