//! Broadcast bus

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use tabsync_core::{
    BroadcastMessage, BusAction, Clock, MediumEvent, SharedMedium, StorageError, SystemClock,
    TabId,
};

use crate::seen::SeenSet;

/// Bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Prefix of the medium key messages are written under
    pub namespace: String,
    /// How many recent messages each subscriber remembers for dedup
    pub seen_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            namespace: "tabsync".to_string(),
            seen_capacity: 256,
        }
    }
}

/// What a subscriber yields
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Message(BroadcastMessage),
    /// The medium dropped `missed` events before this subscriber saw them;
    /// messages from other tabs may be among them
    Lagged(u64),
}

/// Publisher half, one per tab
pub struct BroadcastBus {
    medium: Arc<dyn SharedMedium>,
    key: String,
    tab_id: TabId,
    next_message_id: AtomicU64,
    seen_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BroadcastBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastBus")
            .field("key", &self.key)
            .field("tab_id", &self.tab_id)
            .finish_non_exhaustive()
    }
}

impl BroadcastBus {
    pub fn new(medium: Arc<dyn SharedMedium>, tab_id: TabId, config: &BroadcastConfig) -> Self {
        Self {
            medium,
            key: format!("{}:bus", config.namespace),
            tab_id,
            next_message_id: AtomicU64::new(1),
            seen_capacity: config.seen_capacity,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Announce a change to the other tabs; returns the message id used
    pub fn publish(&self, action: BusAction, data: Value) -> Result<u64, StorageError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let message = BroadcastMessage {
            action,
            data,
            sender_id: self.tab_id.clone(),
            message_id,
            timestamp: self.clock.now_utc(),
        };
        let json = serde_json::to_string(&message)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        self.medium.set(&self.key, &json)?;
        self.medium.remove(&self.key)?;

        trace!(tab = %self.tab_id.short_id(), message_id, ?action, "Published broadcast");
        Ok(message_id)
    }

    /// Start receiving other tabs' messages from now on
    pub fn subscribe(&self) -> BusSubscriber {
        BusSubscriber {
            events: self.medium.watch(),
            key: self.key.clone(),
            tab_id: self.tab_id.clone(),
            seen: SeenSet::new(self.seen_capacity),
        }
    }

    /// Run `handler` for every event from other tabs on a background task
    pub fn spawn_subscriber<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(BusEvent) + Send + 'static,
    {
        let mut subscriber = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscriber.recv().await {
                handler(event);
            }
        })
    }
}

/// Receiving half, filtered to messages from other tabs
#[derive(Debug)]
pub struct BusSubscriber {
    events: broadcast::Receiver<MediumEvent>,
    key: String,
    tab_id: TabId,
    seen: SeenSet,
}

impl BusSubscriber {
    /// Next message from another tab, or notice that some were lost
    ///
    /// Own messages, duplicates and undecodable entries are skipped. After a
    /// [`BusEvent::Lagged`] the caller should refetch authoritative state.
    /// Returns `None` once the medium is gone. Cancel-safe.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            let event = match self.events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!(tab = %self.tab_id.short_id(), missed, "Broadcast subscriber lagged");
                    return Some(BusEvent::Lagged(missed));
                }
                Err(RecvError::Closed) => return None,
            };

            if let Some(message) = self.accept(event) {
                return Some(BusEvent::Message(message));
            }
        }
    }

    /// Next message from another tab, skipping lag notices
    pub async fn recv_message(&mut self) -> Option<BroadcastMessage> {
        loop {
            match self.recv().await? {
                BusEvent::Message(message) => return Some(message),
                BusEvent::Lagged(_) => continue,
            }
        }
    }

    fn accept(&mut self, event: MediumEvent) -> Option<BroadcastMessage> {
        if event.key != self.key {
            return None;
        }
        // The removal half of the write/remove pair carries nothing
        let raw = event.new_value?;

        let message: BroadcastMessage = match serde_json::from_str(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable broadcast");
                return None;
            }
        };

        if message.sender_id == self.tab_id {
            trace!(message_id = message.message_id, "Dropping own broadcast");
            return None;
        }

        if !self.seen.insert(&message.sender_id, message.message_id) {
            debug!(
                sender = %message.sender_id.short_id(),
                message_id = message.message_id,
                "Dropping duplicate broadcast"
            );
            return None;
        }

        Some(message)
    }
}
