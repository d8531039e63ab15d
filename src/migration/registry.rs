//! Migration registry holding every known migration definition.

use super::types::{validate_name, MigrationDefinition, MigrationError};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Registry of all available migrations.
///
/// Append-only: definitions are collected once at startup and the registry is
/// then shared read-only (usually as `Arc<MigrationRegistry>`) with the runner.
/// Registration order carries no meaning; the resolver decides execution order.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    migrations: Vec<MigrationDefinition>,
    names: HashSet<String>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration.
    ///
    /// Fails with `DuplicateName` if a migration with the same name exists and
    /// with `InvalidName` if the name is not usable as a ledger entry.
    pub fn register(&mut self, definition: MigrationDefinition) -> Result<(), MigrationError> {
        validate_name(definition.name())?;

        if self.names.contains(definition.name()) {
            return Err(MigrationError::DuplicateName(definition.name().to_string()));
        }

        debug!(
            migration = %definition.name(),
            run_order = definition.run_order(),
            dependencies = definition.dependencies().len(),
            "Registered migration"
        );

        self.names.insert(definition.name().to_string());
        self.migrations.push(definition);
        Ok(())
    }

    /// All registered definitions. Callers must not rely on the order.
    pub fn all(&self) -> &[MigrationDefinition] {
        &self.migrations
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Option<&MigrationDefinition> {
        self.migrations.iter().find(|m| m.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Lifecycle of the process-wide registry: collecting, then frozen for good.
enum GlobalRegistry {
    Collecting(MigrationRegistry),
    Frozen(Arc<MigrationRegistry>),
}

static GLOBAL_REGISTRY: Lazy<Mutex<GlobalRegistry>> =
    Lazy::new(|| Mutex::new(GlobalRegistry::Collecting(MigrationRegistry::new())));

/// Register a migration with the process-wide registry.
///
/// This is the entry point for migration modules that register themselves at
/// startup. Fails with `RegistryFrozen` once [`freeze_global_registry`] ran.
pub fn register_migration(definition: MigrationDefinition) -> Result<(), MigrationError> {
    let mut global = GLOBAL_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    match &mut *global {
        GlobalRegistry::Collecting(registry) => registry.register(definition),
        GlobalRegistry::Frozen(_) => Err(MigrationError::RegistryFrozen),
    }
}

/// Freeze the process-wide registry and return it for the runner.
///
/// The first call ends the collection phase; later calls return the same
/// frozen registry.
pub fn freeze_global_registry() -> Arc<MigrationRegistry> {
    let mut global = GLOBAL_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    let frozen = match &mut *global {
        GlobalRegistry::Frozen(registry) => return Arc::clone(registry),
        GlobalRegistry::Collecting(registry) => Arc::new(std::mem::take(registry)),
    };

    debug!(count = frozen.len(), "Froze global migration registry");
    *global = GlobalRegistry::Frozen(Arc::clone(&frozen));
    frozen
}
