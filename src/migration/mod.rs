//! Migration engine.
//!
//! Runs named, one-shot data migrations against a key-value store, each at
//! most once, in an order consistent with their declared dependencies.
//!
//! # Overview
//!
//! - Migrations are collected in a `MigrationRegistry` (or with the
//!   process-wide `register_migration`, frozen before the run)
//! - `resolve` orders them topologically, breaking ties by run order then name
//! - The `MigrationLedger` persists the set of applied names under one key
//! - The `MigrationRunner` executes pending migrations one at a time, commits
//!   each success to the ledger, and halts on the first failure
//! - There is no rollback: a failed run leaves the completed prefix in place
//!   and the next run resumes from the failed migration
//!
//! # Usage
//!
//! ```ignore
//! let registry = create_registry(store.clone(), domains)?;
//! let runner = MigrationRunner::new(Arc::new(registry), store, config);
//! let report = runner.run().await?;
//! ```

mod ledger;
mod lock;
pub mod migrations;
mod registry;
mod resolver;
mod runner;
mod types;

pub use ledger::{LedgerError, MigrationLedger};
pub use lock::RunLock;
pub use registry::{freeze_global_registry, register_migration, MigrationRegistry};
pub use resolver::{resolve, ExecutionPlan};
pub use runner::MigrationRunner;
pub use types::{
    validate_name, FailureKind, FnMigration, Migration, MigrationDefinition, MigrationError,
    MigrationFailure, MigrationResult, RunReport, RunState,
};

use crate::store::KeyValueStore;
use migrations::{BackfillRecordIdsMigration, RebuildRecordIndexMigration, SchemaInitMigration};
use std::sync::Arc;

/// Create a registry holding the built-in migrations.
///
/// `domains` lists the record domains the record migrations operate on.
pub fn create_registry(
    store: Arc<dyn KeyValueStore>,
    domains: Vec<String>,
) -> Result<MigrationRegistry, MigrationError> {
    let mut registry = MigrationRegistry::new();

    registry.register(SchemaInitMigration::definition(Arc::clone(&store)))?;
    registry.register(BackfillRecordIdsMigration::definition(
        Arc::clone(&store),
        domains.clone(),
    ))?;
    registry.register(RebuildRecordIndexMigration::definition(store, domains))?;

    // Future migrations will be added here:
    // registry.register(migrations::some_module::SomeMigration::definition(..))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_create_registry() {
        let registry = create_registry(Arc::new(InMemoryStore::new()), Vec::new()).unwrap();
        let names = registry.names();

        assert!(names.contains(&migrations::schema_init::NAME.to_string()));
        assert!(names.contains(&migrations::backfill_record_ids::NAME.to_string()));
        assert!(names.contains(&migrations::rebuild_record_index::NAME.to_string()));
    }

    #[test]
    fn test_builtin_plan_order() {
        let registry = create_registry(Arc::new(InMemoryStore::new()), Vec::new()).unwrap();
        let plan = resolve(registry.all()).unwrap();

        assert_eq!(
            plan.names(),
            vec![
                migrations::schema_init::NAME,
                migrations::backfill_record_ids::NAME,
                migrations::rebuild_record_index::NAME,
            ]
        );
    }
}
