//! Rebuilds the per-domain record index through targeted repairs.

use super::backfill_record_ids;
use crate::migration::types::{Migration, MigrationDefinition, MigrationResult};
use crate::store::records::{index_key, IndexRepair, RecordReader, StoreRecords};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

pub const NAME: &str = "records.index.rebuild.v1";

/// Repairs the index entry of every record object, then drops entries whose
/// record no longer exists. Non-object records are skipped.
pub struct RebuildRecordIndexMigration {
    store: Arc<dyn KeyValueStore>,
    records: StoreRecords,
    domains: Vec<String>,
}

impl RebuildRecordIndexMigration {
    pub fn new(store: Arc<dyn KeyValueStore>, domains: Vec<String>) -> Self {
        Self {
            records: StoreRecords::new(Arc::clone(&store)),
            store,
            domains,
        }
    }

    pub fn definition(store: Arc<dyn KeyValueStore>, domains: Vec<String>) -> MigrationDefinition {
        MigrationDefinition::new(NAME, Self::new(store, domains))
            .with_run_order(20)
            .with_dependency(backfill_record_ids::NAME)
            .with_description("Rebuild record indices")
    }
}

#[async_trait]
impl Migration for RebuildRecordIndexMigration {
    async fn apply(&self) -> anyhow::Result<MigrationResult> {
        for domain in &self.domains {
            let records = self.records.read_all(domain).await?;

            let mut ids = BTreeSet::new();
            let mut skipped = 0;
            for record in &records {
                // Backfill only assigns ids to objects; anything else is not indexable.
                let Value::Object(fields) = record else {
                    skipped += 1;
                    continue;
                };
                match fields.get("id").and_then(Value::as_str) {
                    Some(id) => {
                        ids.insert(id.to_string());
                    }
                    None => {
                        return Ok(MigrationResult::failure(format!(
                            "domain '{domain}' has records without an id"
                        )));
                    }
                }
            }

            for id in &ids {
                self.records.repair_index(domain, id).await?;
            }

            let stale: Vec<String> = match self.store.get(&index_key(domain)).await? {
                Some(Value::Object(index)) => index
                    .keys()
                    .filter(|id| !ids.contains(*id))
                    .cloned()
                    .collect(),
                _ => Vec::new(),
            };
            for id in &stale {
                self.records.repair_index(domain, id).await?;
            }

            info!(
                domain = %domain,
                indexed = ids.len(),
                removed = stale.len(),
                skipped,
                "Rebuilt record index"
            );
        }

        Ok(MigrationResult::success())
    }
}
