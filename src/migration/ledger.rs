//! Persisted set of applied migrations.
//!
//! The whole set lives under one well-known key. Writers always store a sorted
//! JSON array; readers also accept the object-keyed form older writers used
//! for sets, and arrays with duplicates or in any order.

use crate::store::{KeyValueStore, StoreError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger at key '{key}' is corrupted: {reason}")]
    Corrupted { key: String, reason: String },
}

/// Durable record of which migrations have completed.
///
/// `mark_applied` is a read-modify-write of the full set; calls must be
/// serialized, which the runner guarantees by executing one migration at a time.
#[derive(Clone)]
pub struct MigrationLedger {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl MigrationLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// The store key holding the ledger.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Every migration name recorded as applied.
    pub async fn applied_set(&self) -> Result<BTreeSet<String>, LedgerError> {
        let value = self.store.get(&self.key).await?;
        normalize(&self.key, value)
    }

    pub async fn is_applied(&self, name: &str) -> Result<bool, LedgerError> {
        Ok(self.applied_set().await?.contains(name))
    }

    /// Record `name` as applied. The write is durable once this returns.
    pub async fn mark_applied(&self, name: &str) -> Result<(), LedgerError> {
        let mut applied = self.applied_set().await?;
        if !applied.insert(name.to_string()) {
            return Ok(());
        }

        let value = Value::Array(applied.into_iter().map(Value::String).collect());
        self.store.set(&self.key, value).await?;

        debug!(migration = %name, key = %self.key, "Marked migration applied");
        Ok(())
    }
}

/// Accept any representation a writer may have left and return the set.
fn normalize(key: &str, value: Option<Value>) -> Result<BTreeSet<String>, LedgerError> {
    let corrupted = |reason: String| LedgerError::Corrupted {
        key: key.to_string(),
        reason,
    };

    match value {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                other => Err(corrupted(format!("non-string entry {other}"))),
            })
            .collect(),
        Some(Value::Object(map)) => Ok(map.into_iter().map(|(name, _)| name).collect()),
        Some(other) => Err(corrupted(format!("expected an array or object, found {other}"))),
    }
}
