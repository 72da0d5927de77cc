//! Snapshot collaborator
//!
//! The REST side (`GET /entities`) is external; the engine only needs "give me
//! the full current collection".

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use tabsync_core::{ConnectivityError, Entity, TabsyncResult};

/// Fetches the server's full collection of one entity type
#[async_trait]
pub trait SnapshotSource<T: Entity>: Send + Sync {
    async fn fetch(&self) -> TabsyncResult<Vec<T>>;
}

/// In-memory snapshot source for tests and simulation
#[derive(Debug)]
pub struct MemorySnapshotSource<T> {
    entities: Mutex<Vec<T>>,
    available: Mutex<bool>,
    fetches: AtomicUsize,
}

impl<T: Entity> MemorySnapshotSource<T> {
    pub fn new(entities: Vec<T>) -> Self {
        Self {
            entities: Mutex::new(entities),
            available: Mutex::new(true),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Replace what the next fetch returns
    pub fn set(&self, entities: Vec<T>) {
        *self.entities.lock().unwrap_or_else(|p| p.into_inner()) = entities;
    }

    /// Make fetches fail (server unreachable)
    pub fn set_available(&self, available: bool) {
        *self.available.lock().unwrap_or_else(|p| p.into_inner()) = available;
    }

    /// Number of fetch calls so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl<T: Entity> Default for MemorySnapshotSource<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl<T: Entity> SnapshotSource<T> for MemorySnapshotSource<T> {
    async fn fetch(&self) -> TabsyncResult<Vec<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !*self.available.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(ConnectivityError::ConnectFailed("snapshot endpoint unreachable".into()).into());
        }
        Ok(self.entities.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }
}
