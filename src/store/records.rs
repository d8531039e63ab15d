//! Record-level collaborators used by migration bodies.
//!
//! Records of a domain live as a JSON array under `records:{domain}`; the
//! per-domain index lives as a JSON object under `index:{domain}` mapping a
//! record id to the SHA-256 of the record's JSON.

use super::{update, KeyValueStore, StoreError};
use crate::utils::compute_hash;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Key under which the records of `domain` are stored
pub fn records_key(domain: &str) -> String {
    format!("records:{domain}")
}

/// Key under which the index of `domain` is stored
pub fn index_key(domain: &str) -> String {
    format!("index:{domain}")
}

/// Bulk reader returning every record of a domain.
#[async_trait]
pub trait RecordReader: Send + Sync {
    async fn read_all(&self, domain: &str) -> Result<Vec<Value>, StoreError>;
}

/// Targeted index repair keyed by record identifier.
#[async_trait]
pub trait IndexRepair: Send + Sync {
    /// Bring the index entry for `record_id` in line with the stored record.
    /// Removes the entry if no record with that id exists.
    async fn repair_index(&self, domain: &str, record_id: &str) -> Result<(), StoreError>;
}

/// [`RecordReader`] and [`IndexRepair`] over any [`KeyValueStore`].
#[derive(Clone)]
pub struct StoreRecords {
    store: Arc<dyn KeyValueStore>,
}

impl StoreRecords {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordReader for StoreRecords {
    async fn read_all(&self, domain: &str) -> Result<Vec<Value>, StoreError> {
        match self.store.get(&records_key(domain)).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(records)) => Ok(records),
            Some(other) => Err(StoreError::Unavailable(format!(
                "records for domain '{domain}' are not an array: {other}"
            ))),
        }
    }
}

#[async_trait]
impl IndexRepair for StoreRecords {
    async fn repair_index(&self, domain: &str, record_id: &str) -> Result<(), StoreError> {
        let records = self.read_all(domain).await?;
        let entry = records
            .iter()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(record_id))
            .map(|r| compute_hash(&r.to_string()));

        let record_id = record_id.to_string();
        update(self.store.as_ref(), &index_key(domain), move |current| {
            let mut index = match current {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            match entry {
                Some(hash) => {
                    index.insert(record_id, Value::String(hash));
                }
                None => {
                    index.remove(&record_id);
                }
            }
            Some(Value::Object(index))
        })
        .await?;

        Ok(())
    }
}
