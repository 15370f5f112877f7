//! Round scheduler.
//!
//! Services are independent, so each round applies the head migration of
//! every still-pending service concurrently. The only cross-service
//! synchronization point is the schema-convergence barrier between rounds:
//! without it a later migration could observe a partially propagated schema
//! from another service. Bootstraps use a simpler shape: one fan-out, one
//! barrier.

use crate::error::{EngineError, EngineResult};
use crate::scripts::{ApplyOutcome, Bootstrap, Migration};
use cqldrift_state::{SessionRegistry, StateStore};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Per-(keyspace, service) migration queues, each ordered by filename.
#[derive(Debug, Default)]
pub struct ServiceQueues {
    queues: BTreeMap<(String, String), VecDeque<Migration>>,
}

impl ServiceQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a migration to its service's queue. Callers push in filename
    /// order; [`ServiceQueues::push`] preserves it.
    pub fn push(&mut self, migration: Migration) {
        let key = (migration.keyspace.clone(), migration.service.clone());
        self.queues.entry(key).or_default().push_back(migration);
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Total pending migrations.
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Number of services still holding migrations.
    pub fn stream_count(&self) -> usize {
        self.queues.len()
    }

    /// Remove and return the head migration of every service; services whose
    /// queue drains are dropped.
    pub fn next_round(&mut self) -> Vec<Migration> {
        let mut round = Vec::with_capacity(self.queues.len());
        for queue in self.queues.values_mut() {
            if let Some(migration) = queue.pop_front() {
                round.push(migration);
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        round
    }
}

/// Totals for a completed migration phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub rounds: usize,
    pub applied: usize,
    pub skipped: usize,
}

/// Drives the bootstrap fan-out and the migration rounds.
pub struct Scheduler<'a> {
    store: &'a StateStore,
    registry: &'a SessionRegistry,
    timeout: Duration,
}

impl<'a> Scheduler<'a> {
    pub fn new(store: &'a StateStore, registry: &'a SessionRegistry, timeout: Duration) -> Self {
        Self {
            store,
            registry,
            timeout,
        }
    }

    /// Apply every bootstrap concurrently. All attempts run to completion
    /// before any failure is reported; a fully successful phase ends with a
    /// single convergence barrier.
    pub async fn run_bootstraps(&self, bootstraps: Vec<Bootstrap>) -> EngineResult<()> {
        if bootstraps.is_empty() {
            return Ok(());
        }
        let total = bootstraps.len();

        let mut in_flight = FuturesUnordered::new();
        for mut bootstrap in bootstraps {
            in_flight.push(async move {
                let result = match self.registry.admin().await {
                    Ok(session) => {
                        bootstrap
                            .apply(self.store, session.as_ref(), self.timeout)
                            .await
                    }
                    Err(e) => Err(e.into()),
                };
                (bootstrap, result)
            });
        }

        let mut failed = 0;
        while let Some((bootstrap, result)) = in_flight.next().await {
            match result {
                Ok(()) => tracing::info!(
                    keyspace = %bootstrap.keyspace,
                    file = %bootstrap.file,
                    "Bootstrap applied"
                ),
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        keyspace = %bootstrap.keyspace,
                        file = %bootstrap.file,
                        error = %e,
                        "Bootstrap failed"
                    );
                }
            }
        }
        if failed > 0 {
            return Err(EngineError::BootstrapPhaseFailed { failed });
        }

        tracing::debug!(bootstraps = total, "Bootstrap phase complete, awaiting schema agreement");
        self.store.await_schema_agreement().await;
        Ok(())
    }

    /// Drain the queues round by round.
    ///
    /// Every head in a round runs to completion even when a sibling fails;
    /// a failed round aborts the run without waiting for convergence, while
    /// a successful one blocks on schema agreement before the next begins.
    pub async fn run_migrations(&self, mut queues: ServiceQueues) -> EngineResult<MigrationStats> {
        let mut stats = MigrationStats::default();

        while !queues.is_empty() {
            let round = queues.next_round();
            stats.rounds += 1;
            tracing::debug!(round = stats.rounds, size = round.len(), "Starting round");

            let mut in_flight = FuturesUnordered::new();
            for mut migration in round {
                in_flight.push(async move {
                    let result = match self.registry.keyspace(&migration.keyspace).await {
                        Ok(session) => {
                            migration
                                .apply(self.store, session.as_ref(), self.timeout)
                                .await
                        }
                        Err(e) => Err(e.into()),
                    };
                    (migration, result)
                });
            }

            let mut failed = 0;
            while let Some((migration, result)) = in_flight.next().await {
                match result {
                    Ok(ApplyOutcome::Applied) => {
                        stats.applied += 1;
                        tracing::info!(
                            keyspace = %migration.keyspace,
                            service = %migration.service,
                            file = %migration.file,
                            "Migration applied"
                        );
                    }
                    Ok(ApplyOutcome::Skipped) => stats.skipped += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::error!(
                            keyspace = %migration.keyspace,
                            service = %migration.service,
                            file = %migration.file,
                            error = %e,
                            "Migration failed"
                        );
                    }
                }
            }
            if failed > 0 {
                return Err(EngineError::RoundFailed {
                    round: stats.rounds,
                    failed,
                });
            }

            self.store.await_schema_agreement().await;
        }
        Ok(stats)
    }
}
