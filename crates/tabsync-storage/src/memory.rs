//! In-memory shared medium
//!
//! The in-process stand-in for browser local storage. Clones share one map and
//! one notification channel, so every clone handed to a simulated tab observes
//! writes made through any other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use tabsync_core::{MediumEvent, SharedMedium, StorageError};

use crate::WATCH_CAPACITY;

#[derive(Debug)]
struct Inner {
    entries: DashMap<String, String>,
    events: broadcast::Sender<MediumEvent>,
}

/// Observable in-memory key-value medium
#[derive(Debug, Clone)]
pub struct MemoryMedium {
    inner: Arc<Inner>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                events,
            }),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No receivers is fine: nobody is watching yet
        let _ = self.inner.events.send(MediumEvent {
            key: key.to_string(),
            new_value,
        });
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMedium for MemoryMedium {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner
            .entries
            .insert(key.to_string(), value.to_string());
        trace!(key, len = value.len(), "medium set");
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.entries.remove(key);
        trace!(key, "medium remove");
        self.notify(key, None);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn watch(&self) -> broadcast::Receiver<MediumEvent> {
        self.inner.events.subscribe()
    }
}
