//! Advisory run lock stored as a marker key next to the ledger.

use super::types::MigrationError;
use crate::store::{KeyValueStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockMarker {
    owner: String,
    acquired_at: DateTime<Utc>,
}

impl LockMarker {
    fn is_stale(&self, stale_after: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.acquired_at)
            .to_std()
            .is_ok_and(|age| age > stale_after)
    }
}

/// Held by the runner for the duration of a run.
///
/// Release explicitly with [`RunLock::release`]. A lock dropped without
/// release (e.g. the run future was cancelled) removes its marker from a
/// background task. A marker left behind by a crashed process is taken over
/// once it is older than the stale threshold.
pub struct RunLock {
    store: Arc<dyn KeyValueStore>,
    key: String,
    owner: String,
    released: bool,
}

impl RunLock {
    /// Acquire the lock or fail with `AlreadyRunning`.
    ///
    /// `stale_after` of `None` never takes over an existing marker.
    pub async fn acquire(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        stale_after: Option<Duration>,
    ) -> Result<Self, MigrationError> {
        let key = key.into();
        let marker = LockMarker {
            owner: Uuid::new_v4().to_string(),
            acquired_at: Utc::now(),
        };
        let value = serde_json::to_value(&marker).map_err(StoreError::from)?;

        if store.insert_if_absent(&key, value.clone()).await? {
            debug!(key = %key, owner = %marker.owner, "Acquired migration run lock");
            return Ok(Self {
                store,
                key,
                owner: marker.owner,
                released: false,
            });
        }

        let Some(stale_after) = stale_after else {
            return Err(MigrationError::AlreadyRunning);
        };

        let existing = store.get(&key).await?;
        let takeover = match existing.map(serde_json::from_value::<LockMarker>) {
            // Released between our two calls
            None => true,
            Some(Ok(held)) if held.is_stale(stale_after) => {
                warn!(
                    key = %key,
                    previous_owner = %held.owner,
                    acquired_at = %held.acquired_at.to_rfc3339(),
                    "Taking over stale migration run lock"
                );
                true
            }
            Some(Ok(_)) => false,
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Replacing unreadable migration run lock");
                true
            }
        };

        if !takeover {
            return Err(MigrationError::AlreadyRunning);
        }

        store.set(&key, value).await?;

        // Another runner may have raced us to the takeover.
        let current = store.get(&key).await?;
        let ours = current
            .and_then(|v| serde_json::from_value::<LockMarker>(v).ok())
            .is_some_and(|m| m.owner == marker.owner);
        if !ours {
            return Err(MigrationError::AlreadyRunning);
        }

        Ok(Self {
            store,
            key,
            owner: marker.owner,
            released: false,
        })
    }

    /// Token identifying this holder.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Remove the marker if it is still ours.
    pub async fn release(mut self) -> Result<(), StoreError> {
        release_marker(self.store.as_ref(), &self.key, &self.owner).await?;
        self.released = true;
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "Run lock dropped outside a runtime, marker left in place");
            return;
        };

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        handle.spawn(async move {
            if let Err(e) = release_marker(store.as_ref(), &key, &owner).await {
                warn!(key = %key, error = %e, "Failed to release abandoned migration run lock");
            }
        });
    }
}

async fn release_marker(
    store: &dyn KeyValueStore,
    key: &str,
    owner: &str,
) -> Result<(), StoreError> {
    let current = store
        .get(key)
        .await?
        .and_then(|v| serde_json::from_value::<LockMarker>(v).ok());

    match current {
        Some(marker) if marker.owner == owner => {
            store.delete(key).await?;
            debug!(key = %key, owner = %owner, "Released migration run lock");
        }
        _ => {
            warn!(
                key = %key,
                owner = %owner,
                "Migration run lock was taken over before release, leaving it in place"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    const KEY: &str = "migrations:lock";

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = Arc::new(InMemoryStore::new());

        let lock = RunLock::acquire(store.clone(), KEY, None).await.unwrap();
        let marker = store.get(KEY).await.unwrap().unwrap();
        assert_eq!(marker["owner"], json!(lock.owner()));

        lock.release().await.unwrap();
        assert_eq!(store.get(KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_acquire_fails() {
        let store = Arc::new(InMemoryStore::new());

        let _held = RunLock::acquire(store.clone(), KEY, Some(Duration::from_secs(600)))
            .await
            .unwrap();
        let second = RunLock::acquire(store.clone(), KEY, Some(Duration::from_secs(600))).await;

        assert!(matches!(second, Err(MigrationError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_stale_marker_taken_over() {
        let stale = LockMarker {
            owner: "crashed-process".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        let store = Arc::new(InMemoryStore::with_entries([(
            KEY,
            serde_json::to_value(&stale).unwrap(),
        )]));

        let lock = RunLock::acquire(store.clone(), KEY, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_ne!(lock.owner(), "crashed-process");
    }

    #[tokio::test]
    async fn test_stale_marker_kept_without_threshold() {
        let stale = LockMarker {
            owner: "crashed-process".to_string(),
            acquired_at: Utc::now() - chrono::Duration::days(30),
        };
        let store = Arc::new(InMemoryStore::with_entries([(
            KEY,
            serde_json::to_value(&stale).unwrap(),
        )]));

        let result = RunLock::acquire(store.clone(), KEY, None).await;
        assert!(matches!(result, Err(MigrationError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_unreadable_marker_replaced() {
        let store = Arc::new(InMemoryStore::with_entries([(KEY, json!("garbage"))]));
        let lock = RunLock::acquire(store.clone(), KEY, Some(Duration::from_secs(60))).await;
        assert!(lock.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_lock_removes_marker() {
        let store = Arc::new(InMemoryStore::new());
        let lock = RunLock::acquire(store.clone(), KEY, None).await.unwrap();

        drop(lock);
        // Cleanup runs on a spawned task
        for _ in 0..10 {
            if store.get(KEY).await.unwrap().is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(store.get(KEY).await.unwrap(), None);
        assert!(RunLock::acquire(store.clone(), KEY, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_leaves_foreign_marker() {
        let store = Arc::new(InMemoryStore::new());
        let lock = RunLock::acquire(store.clone(), KEY, None).await.unwrap();

        store
            .set(KEY, json!({"owner": "someone-else", "acquiredAt": Utc::now()}))
            .await
            .unwrap();
        lock.release().await.unwrap();

        let marker = store.get(KEY).await.unwrap().unwrap();
        assert_eq!(marker["owner"], json!("someone-else"));
    }
}
