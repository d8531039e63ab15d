//! Types for the migration system.

use super::ledger::LedgerError;
use crate::store::StoreError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Migration names double as ledger entries, so they are restricted to
/// characters that survive any key-value backend unchanged.
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/-]*$").expect("valid name pattern"));

/// Error types for migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Migration {0} is already registered")]
    DuplicateName(String),

    #[error("Invalid migration name: '{0}'")]
    InvalidName(String),

    #[error("Migration {migration} depends on unknown migration {dependency}")]
    UnknownDependency {
        migration: String,
        dependency: String,
    },

    #[error("Cyclic dependency between migrations: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("Migration registry is frozen, register migrations before the runner starts")]
    RegistryFrozen,

    #[error("Migration {name} failed: {reason}")]
    MigrationFailed {
        name: String,
        reason: String,
        completed: Vec<String>,
    },

    #[error("Migration {name} timed out after {}ms", .after.as_millis())]
    Timeout {
        name: String,
        after: Duration,
        completed: Vec<String>,
    },

    #[error("Ledger error: {source}")]
    LedgerIo {
        source: LedgerError,
        completed: Vec<String>,
    },

    #[error("Migration is already in progress for this store")]
    AlreadyRunning,

    #[error("Run lock error: {0}")]
    Lock(#[from] StoreError),
}

impl MigrationError {
    /// Migrations that completed during the run that produced this error.
    pub fn completed(&self) -> &[String] {
        match self {
            Self::MigrationFailed { completed, .. }
            | Self::Timeout { completed, .. }
            | Self::LedgerIo { completed, .. } => completed,
            _ => &[],
        }
    }

    /// Whether the error was raised before any migration could execute
    /// (registration or resolution defects).
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName(_)
                | Self::InvalidName(_)
                | Self::UnknownDependency { .. }
                | Self::CyclicDependency(_)
        )
    }
}

impl From<LedgerError> for MigrationError {
    fn from(source: LedgerError) -> Self {
        Self::LedgerIo {
            source,
            completed: Vec::new(),
        }
    }
}

/// Outcome reported by a migration's apply routine.
///
/// `error` is present exactly when the migration did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    success: bool,
    error: Option<String>,
}

impl MigrationResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// The apply routine of a single migration.
///
/// Implementations must be idempotent: a crash between a successful apply and
/// the ledger commit re-runs the migration on the next start.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Apply the migration.
    ///
    /// Return `Ok(MigrationResult::failure(..))` for an expected failure and
    /// `Err(_)` when something unexpected went wrong; both halt the run.
    async fn apply(&self) -> anyhow::Result<MigrationResult>;
}

/// Adapter turning an async closure into a [`Migration`].
pub struct FnMigration<F> {
    f: F,
}

impl<F> FnMigration<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Migration for FnMigration<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<MigrationResult>> + Send,
{
    async fn apply(&self) -> anyhow::Result<MigrationResult> {
        (self.f)().await
    }
}

/// A registered unit of migration: identity, ordering hints and the routine.
#[derive(Clone)]
pub struct MigrationDefinition {
    name: String,
    run_order: i32,
    dependencies: BTreeSet<String>,
    description: Option<String>,
    migration: Arc<dyn Migration>,
}

impl MigrationDefinition {
    /// Create a definition with run order 0 and no dependencies.
    pub fn new<M>(name: impl Into<String>, migration: M) -> Self
    where
        M: Migration + 'static,
    {
        Self::from_arc(name, Arc::new(migration))
    }

    /// Create a definition from a shared migration instance.
    pub fn from_arc(name: impl Into<String>, migration: Arc<dyn Migration>) -> Self {
        Self {
            name: name.into(),
            run_order: 0,
            dependencies: BTreeSet::new(),
            description: None,
            migration,
        }
    }

    /// Create a definition from an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<MigrationResult>> + Send + 'static,
    {
        Self::new(name, FnMigration::new(f))
    }

    pub fn with_run_order(mut self, run_order: i32) -> Self {
        self.run_order = run_order;
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_order(&self) -> i32 {
        self.run_order
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub(crate) fn migration(&self) -> Arc<dyn Migration> {
        Arc::clone(&self.migration)
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("name", &self.name)
            .field("run_order", &self.run_order)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Why a migration halted the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The apply routine returned `MigrationResult::failure`.
    Reported(String),
    /// The apply routine returned an error or panicked.
    Raised(String),
    /// The apply routine did not finish within the configured timeout.
    TimedOut(Duration),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reported(reason) => write!(f, "{reason}"),
            Self::Raised(reason) => write!(f, "raised: {reason}"),
            Self::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

/// The migration that halted a run and the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    pub name: String,
    pub kind: FailureKind,
}

/// Where a runner is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Resolving,
    Executing {
        /// Zero-based position among the pending migrations.
        index: usize,
        total: usize,
        current: String,
    },
    Completed,
    Failed,
}

/// Result of a migration run that got past resolution.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Full resolved order, applied or not.
    pub plan: Vec<String>,
    /// Fingerprint of `plan`.
    pub fingerprint: String,
    /// Migrations skipped because the ledger already had them.
    pub skipped: Vec<String>,
    /// Migrations applied and committed during this run, in order.
    pub completed: Vec<String>,
    /// The migration that halted the run, if any.
    pub failure: Option<MigrationFailure>,
    /// When the run started (RFC 3339).
    pub started_at: String,
    pub duration_ms: i64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Turn a halted run into an error carrying the completed prefix.
    pub fn into_result(self) -> Result<RunReport, MigrationError> {
        match self.failure {
            None => Ok(self),
            Some(MigrationFailure {
                name,
                kind: FailureKind::TimedOut(after),
            }) => Err(MigrationError::Timeout {
                name,
                after,
                completed: self.completed,
            }),
            Some(MigrationFailure { name, kind }) => Err(MigrationError::MigrationFailed {
                name,
                reason: kind.to_string(),
                completed: self.completed,
            }),
        }
    }
}

/// Check that `name` is usable as a migration name.
pub fn validate_name(name: &str) -> Result<(), MigrationError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(MigrationError::InvalidName(name.to_string()))
    }
}
