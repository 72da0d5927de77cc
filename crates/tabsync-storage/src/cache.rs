//! Snapshot cache
//!
//! Persists the last known collection per key as
//! `{"writtenAt": <timestamp>, "payload": [..entities..]}` so a store can
//! hydrate instantly on load, before (or without) any network.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tabsync_core::{CacheCorruption, Entity, SharedMedium, StorageError};

/// A cached collection with the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot<T> {
    pub written_at: DateTime<Utc>,
    pub payload: Vec<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a, T> {
    written_at: DateTime<Utc>,
    payload: &'a [T],
}

/// Namespaced snapshot persistence over a shared medium
#[derive(Clone)]
pub struct CacheLayer {
    medium: Arc<dyn SharedMedium>,
    namespace: String,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl CacheLayer {
    pub fn new(medium: Arc<dyn SharedMedium>, namespace: impl Into<String>) -> Self {
        Self {
            medium,
            namespace: namespace.into(),
        }
    }

    /// The medium key a cache key is stored under
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}:cache:{}", self.namespace, key)
    }

    /// Persist a snapshot of `collection` stamped with `written_at`
    pub fn save<T: Entity>(
        &self,
        key: &str,
        collection: &[T],
        written_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let snapshot = SnapshotRef {
            written_at,
            payload: collection,
        };
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        self.medium.set(&self.storage_key(key), &json)?;
        debug!(key, entities = collection.len(), "Saved cache snapshot");
        Ok(())
    }

    /// Load a snapshot, distinguishing a miss from a corrupt entry
    pub fn try_load<T: Entity>(
        &self,
        key: &str,
    ) -> Result<Option<CachedSnapshot<T>>, CacheCorruption> {
        let storage_key = self.storage_key(key);
        let raw = self.medium.get(&storage_key).map_err(|e| CacheCorruption {
            key: storage_key.clone(),
            reason: e.to_string(),
        })?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CacheCorruption {
                key: storage_key,
                reason: e.to_string(),
            })
    }

    /// Load a snapshot; corruption is logged and treated as a miss
    pub fn load<T: Entity>(&self, key: &str) -> Option<CachedSnapshot<T>> {
        match self.try_load(key) {
            Ok(snapshot) => snapshot,
            Err(corruption) => {
                warn!(error = %corruption, "Ignoring unreadable cache entry");
                None
            }
        }
    }
}
