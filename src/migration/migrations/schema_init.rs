//! Initial migration - stamps the store with a schema version.
//!
//! Stores written before the engine existed have no `schema_version` key.
//! This migration records version 1 so later migrations can rely on it.

use crate::migration::types::{Migration, MigrationDefinition, MigrationResult};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Name of the schema initialization migration.
pub const NAME: &str = "store.schema.init.v1";

/// Key holding the store's schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Writes `schema_version = 1` unless a version is already present.
pub struct SchemaInitMigration {
    store: Arc<dyn KeyValueStore>,
}

impl SchemaInitMigration {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn definition(store: Arc<dyn KeyValueStore>) -> MigrationDefinition {
        MigrationDefinition::new(NAME, Self::new(store))
            .with_run_order(0)
            .with_description("Initialize schema version tracking for existing stores")
    }
}

#[async_trait]
impl Migration for SchemaInitMigration {
    async fn apply(&self) -> anyhow::Result<MigrationResult> {
        // Leave an existing (possibly newer) version alone.
        self.store
            .insert_if_absent(SCHEMA_VERSION_KEY, json!(1))
            .await?;
        Ok(MigrationResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_definition_metadata() {
        let def = SchemaInitMigration::definition(Arc::new(InMemoryStore::new()));
        assert_eq!(def.name(), NAME);
        assert_eq!(def.run_order(), 0);
        assert!(def.dependencies().is_empty());
        assert!(def.description().is_some());
    }

    #[tokio::test]
    async fn test_writes_version_once() {
        let store = Arc::new(InMemoryStore::new());
        let migration = SchemaInitMigration::new(store.clone());

        assert!(migration.apply().await.unwrap().is_success());
        assert_eq!(store.get(SCHEMA_VERSION_KEY).await.unwrap(), Some(json!(1)));

        // Idempotent
        assert!(migration.apply().await.unwrap().is_success());
        assert_eq!(store.get(SCHEMA_VERSION_KEY).await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_keeps_existing_version() {
        let store = Arc::new(InMemoryStore::with_entries([(SCHEMA_VERSION_KEY, json!(3))]));
        let migration = SchemaInitMigration::new(store.clone());

        migration.apply().await.unwrap();
        assert_eq!(store.get(SCHEMA_VERSION_KEY).await.unwrap(), Some(json!(3)));
    }
}
