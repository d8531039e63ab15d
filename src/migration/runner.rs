//! Migration runner: resolves, filters and executes pending migrations.

use super::ledger::MigrationLedger;
use super::lock::RunLock;
use super::registry::MigrationRegistry;
use super::resolver::{resolve, ExecutionPlan};
use super::types::{
    FailureKind, MigrationDefinition, MigrationError, MigrationFailure, RunReport, RunState,
};
use crate::config::EngineConfig;
use crate::store::KeyValueStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Runner for registered migrations.
///
/// Migrations execute strictly one after another. Each success is committed
/// to the ledger before the next migration starts, and the first failure halts
/// the run. Calling [`MigrationRunner::run`] again resumes after the last
/// committed migration.
pub struct MigrationRunner {
    registry: Arc<MigrationRegistry>,
    store: Arc<dyn KeyValueStore>,
    ledger: MigrationLedger,
    config: EngineConfig,
    running: Mutex<()>,
    state: watch::Sender<RunState>,
}

impl MigrationRunner {
    /// Create a new runner over `store` with the given registry.
    pub fn new(
        registry: Arc<MigrationRegistry>,
        store: Arc<dyn KeyValueStore>,
        config: EngineConfig,
    ) -> Self {
        let ledger = MigrationLedger::new(Arc::clone(&store), config.ledger_key.clone());
        let (state, _) = watch::channel(RunState::Idle);

        Self {
            registry,
            store,
            ledger,
            config,
            running: Mutex::new(()),
            state,
        }
    }

    pub fn with_default_config(
        registry: Arc<MigrationRegistry>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::new(registry, store, EngineConfig::default())
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Watch lifecycle transitions, e.g. to drive a progress indicator.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Resolve the full plan without executing anything.
    pub fn plan(&self) -> Result<ExecutionPlan, MigrationError> {
        resolve(self.registry.all())
    }

    /// Resolve the plan and drop the migrations the ledger already has.
    pub async fn pending(&self) -> Result<ExecutionPlan, MigrationError> {
        let plan = self.plan()?;
        let applied = self.ledger.applied_set().await?;
        Ok(plan.pending(&applied))
    }

    /// Run every pending migration.
    ///
    /// Returns `Ok` once resolution succeeded, with the report describing what
    /// ran and, if a migration failed, which one and why. Resolution, ledger and
    /// locking problems are returned as errors.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if this runner, or another one holding the store's run
    /// lock, is mid-run. `DuplicateName`, `UnknownDependency` or
    /// `CyclicDependency` if the registry cannot be ordered; nothing executes.
    /// `LedgerIo` if applied state could not be read or committed.
    pub async fn run(&self) -> Result<RunReport, MigrationError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| MigrationError::AlreadyRunning)?;

        let lock = if self.config.advisory_lock {
            let acquired = RunLock::acquire(
                Arc::clone(&self.store),
                self.config.lock_key.clone(),
                self.config.lock_stale_after(),
            )
            .await;
            match acquired {
                Ok(lock) => Some(lock),
                Err(e) => {
                    warn!(error = %e, "Could not acquire migration run lock");
                    self.state.send_replace(RunState::Failed);
                    return Err(e);
                }
            }
        } else {
            None
        };

        // Publishes `Failed` if the caller drops this future mid-run.
        let mut on_cancel = FailOnDrop {
            state: &self.state,
            armed: true,
        };
        let result = self.run_locked().await;
        on_cancel.armed = false;

        if let Some(lock) = lock {
            if let Err(e) = lock.release().await {
                warn!(error = %e, "Failed to release migration run lock");
            }
        }

        let terminal = match &result {
            Ok(report) if report.is_success() => RunState::Completed,
            _ => RunState::Failed,
        };
        self.state.send_replace(terminal);

        result
    }

    async fn run_locked(&self) -> Result<RunReport, MigrationError> {
        let started_at = Utc::now();
        self.state.send_replace(RunState::Resolving);

        let plan = self.plan().map_err(|e| {
            error!(error = %e, "Migration plan resolution failed, no migrations were run");
            e
        })?;
        let fingerprint = plan.fingerprint();

        let applied = self.ledger.applied_set().await.map_err(|e| {
            error!(error = %e, "Failed to read migration ledger");
            MigrationError::from(e)
        })?;
        let pending = plan.pending(&applied);
        let skipped: Vec<String> = plan
            .names()
            .into_iter()
            .filter(|name| applied.contains(name))
            .collect();

        info!(
            planned = plan.len(),
            pending = pending.len(),
            skipped = skipped.len(),
            fingerprint = %fingerprint,
            "Starting migration run"
        );

        let total = pending.len();
        let mut completed: Vec<String> = Vec::with_capacity(total);
        let mut failure = None;

        for (index, definition) in pending.steps().iter().enumerate() {
            let name = definition.name().to_string();
            self.state.send_replace(RunState::Executing {
                index,
                total,
                current: name.clone(),
            });

            info!(migration = %name, step = index + 1, total, "Applying migration");
            let step_start = Instant::now();

            if let Err(kind) = self.execute(definition).await {
                error!(
                    migration = %name,
                    error = %kind,
                    completed = completed.len(),
                    "Migration failed, halting run"
                );
                failure = Some(MigrationFailure { name, kind });
                break;
            }

            if let Err(source) = self.ledger.mark_applied(&name).await {
                error!(
                    migration = %name,
                    error = %source,
                    "Migration applied but ledger commit failed"
                );
                return Err(MigrationError::LedgerIo { source, completed });
            }

            info!(
                migration = %name,
                duration_ms = step_start.elapsed().as_millis() as u64,
                "Migration applied"
            );
            completed.push(name);
        }

        let duration_ms = (Utc::now() - started_at).num_milliseconds();
        if failure.is_none() {
            info!(
                applied = completed.len(),
                skipped = skipped.len(),
                duration_ms,
                "Migration run completed"
            );
        }

        Ok(RunReport {
            plan: plan.names(),
            fingerprint,
            skipped,
            completed,
            failure,
            started_at: started_at.to_rfc3339(),
            duration_ms,
        })
    }

    /// Run one apply routine on its own task, bounded by the timeout.
    async fn execute(&self, definition: &MigrationDefinition) -> Result<(), FailureKind> {
        let migration = definition.migration();
        let timeout = self.config.migration_timeout();
        // Aborts the apply task if this future is dropped mid-run.
        let mut task = AbortOnDrop(tokio::spawn(async move { migration.apply().await }));

        match tokio::time::timeout(timeout, &mut task.0).await {
            Err(_) => Err(FailureKind::TimedOut(timeout)),
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(FailureKind::Raised("migration panicked".to_string()))
            }
            Ok(Err(join_error)) => Err(FailureKind::Raised(join_error.to_string())),
            Ok(Ok(Err(e))) => Err(FailureKind::Raised(format!("{e:#}"))),
            Ok(Ok(Ok(result))) if result.is_success() => Ok(()),
            Ok(Ok(Ok(result))) => Err(FailureKind::Reported(
                result.error().unwrap_or("migration reported failure").to_string(),
            )),
        }
    }
}

struct FailOnDrop<'a> {
    state: &'a watch::Sender<RunState>,
    armed: bool,
}

impl Drop for FailOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(RunState::Failed);
        }
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
