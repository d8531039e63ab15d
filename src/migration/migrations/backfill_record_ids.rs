//! Assigns a stable `id` to every stored record that lacks one.

use super::schema_init;
use crate::migration::types::{Migration, MigrationDefinition, MigrationResult};
use crate::store::records::records_key;
use crate::store::{update, KeyValueStore};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const NAME: &str = "records.ids.backfill.v1";

/// Gives every record object without a string `id` a fresh UUID.
///
/// Records that already carry an id are left untouched, so re-running after an
/// interrupted run only fills the gaps.
pub struct BackfillRecordIdsMigration {
    store: Arc<dyn KeyValueStore>,
    domains: Vec<String>,
}

impl BackfillRecordIdsMigration {
    pub fn new(store: Arc<dyn KeyValueStore>, domains: Vec<String>) -> Self {
        Self { store, domains }
    }

    pub fn definition(store: Arc<dyn KeyValueStore>, domains: Vec<String>) -> MigrationDefinition {
        MigrationDefinition::new(NAME, Self::new(store, domains))
            .with_run_order(10)
            .with_dependency(schema_init::NAME)
            .with_description("Backfill missing record ids")
    }
}

/// Assign ids in place and return how many were added.
fn assign_missing_ids(records: &mut [Value]) -> usize {
    let mut assigned = 0;
    for record in records.iter_mut() {
        if let Value::Object(fields) = record {
            if !fields.get("id").is_some_and(Value::is_string) {
                fields.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
                assigned += 1;
            }
        }
    }
    assigned
}

#[async_trait]
impl Migration for BackfillRecordIdsMigration {
    async fn apply(&self) -> anyhow::Result<MigrationResult> {
        for domain in &self.domains {
            let mut assigned = 0;

            update(self.store.as_ref(), &records_key(domain), |current| match current {
                Some(Value::Array(mut records)) => {
                    assigned = assign_missing_ids(&mut records);
                    Some(Value::Array(records))
                }
                other => other,
            })
            .await?;

            info!(domain = %domain, assigned, "Backfilled record ids");
        }

        Ok(MigrationResult::success())
    }
}
