#![allow(dead_code)]

use kvmigrate::{
    EngineConfig, InMemoryStore, KeyValueStore, MigrationDefinition, MigrationRegistry,
    MigrationResult, MigrationRunner,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Shared log of apply calls, in call order.
#[derive(Clone, Default)]
pub struct ApplyLog(Arc<Mutex<Vec<String>>>);

impl ApplyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

/// Migration that records its name and succeeds.
pub fn recording(name: &str, log: &ApplyLog) -> MigrationDefinition {
    let log = log.clone();
    let owned = name.to_string();
    MigrationDefinition::from_fn(name, move || {
        let log = log.clone();
        let owned = owned.clone();
        async move {
            log.push(&owned);
            anyhow::Ok(MigrationResult::success())
        }
    })
}

/// Migration that records its name and reports failure.
pub fn failing(name: &str, log: &ApplyLog, reason: &str) -> MigrationDefinition {
    let log = log.clone();
    let owned = name.to_string();
    let reason = reason.to_string();
    MigrationDefinition::from_fn(name, move || {
        let log = log.clone();
        let owned = owned.clone();
        let reason = reason.clone();
        async move {
            log.push(&owned);
            anyhow::Ok(MigrationResult::failure(reason))
        }
    })
}

/// Migration that records its name and then sleeps for `delay`.
pub fn sleeping(name: &str, log: &ApplyLog, delay: Duration) -> MigrationDefinition {
    let log = log.clone();
    let owned = name.to_string();
    MigrationDefinition::from_fn(name, move || {
        let log = log.clone();
        let owned = owned.clone();
        async move {
            log.push(&owned);
            tokio::time::sleep(delay).await;
            anyhow::Ok(MigrationResult::success())
        }
    })
}

/// Build a registry, panicking on registration errors.
pub fn registry_of(definitions: Vec<MigrationDefinition>) -> Arc<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    for definition in definitions {
        registry
            .register(definition)
            .expect("Should register migration");
    }
    Arc::new(registry)
}

/// Runner over a fresh in-memory store.
pub fn memory_runner(
    definitions: Vec<MigrationDefinition>,
) -> (MigrationRunner, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let runner = runner_on(definitions, store.clone(), EngineConfig::default());
    (runner, store)
}

/// Runner over an existing store with the given config.
pub fn runner_on<S>(
    definitions: Vec<MigrationDefinition>,
    store: Arc<S>,
    config: EngineConfig,
) -> MigrationRunner
where
    S: KeyValueStore + 'static,
{
    MigrationRunner::new(registry_of(definitions), store, config)
}

/// Creates a temporary directory for a file-backed store
pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}
