//! Key-value store boundary consumed by the migration engine.
//!
//! The engine never touches storage directly: the ledger, the run lock and the
//! migration bodies all go through [`KeyValueStore`]. Values are JSON documents.

mod file;
mod memory;
pub mod records;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;
pub use records::{IndexRepair, RecordReader, StoreRecords};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A persistent key-value store holding JSON values.
///
/// Implementations must make each `set` and `delete` durable before returning;
/// the ledger relies on this to keep completed migrations marked across crashes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Returns `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Write `value` only if `key` is absent. Returns whether the write happened.
    ///
    /// The default implementation is a plain read followed by a write; stores
    /// that can do better should override it with an atomic version.
    async fn insert_if_absent(&self, key: &str, value: Value) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value).await?;
        Ok(true)
    }
}

/// Generic read-modify-write on a single key.
///
/// `transform` receives the current value (if any) and returns the new one;
/// returning `None` deletes the key. Returns the value that was written.
pub async fn update<S, F>(store: &S, key: &str, transform: F) -> Result<Option<Value>, StoreError>
where
    S: KeyValueStore + ?Sized,
    F: FnOnce(Option<Value>) -> Option<Value> + Send,
{
    let current = store.get(key).await?;
    let next = transform(current);

    match &next {
        Some(value) => store.set(key, value.clone()).await?,
        None => store.delete(key).await?,
    }

    Ok(next)
}
