//! Offline mutation queue
//!
//! A durable, strictly FIFO log of local mutations for one entity type. An
//! entry leaves the queue only on positive acknowledgement (or an explicit
//! rejection/expiry that the caller surfaces); every state change is written
//! through to the medium before the call returns.
//!
//! Entry lifecycle: `Queued -> InFlight -> (acked, removed)` or
//! `InFlight -> Failed -> Queued` on retry. At most the head entry is in
//! flight, so a failure halts the drain without reordering or skipping.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use tabsync_core::{
    ConnectivityError, EntityId, EntityKind, Mutation, MutationId, MutationOp, QueueOverflow,
    SharedMedium, StorageError, TabId,
};

/// Queue limits and timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue length above which sync status degrades to error
    pub high_water_mark: usize,
    /// Round-trip timeout for the in-flight head entry
    pub ack_timeout_ms: u64,
    /// Entries older than this are expired; `None` keeps them forever
    pub max_age_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 500,
            ack_timeout_ms: 10_000,
            max_age_secs: None,
        }
    }
}

impl QueueConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn max_age(&self) -> Option<chrono::Duration> {
        self.max_age_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }
}

/// Delivery state of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Queued,
    InFlight,
    Failed,
}

/// A mutation plus its delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub mutation: Mutation,
    pub state: EntryState,
    /// Failed delivery attempts so far
    #[serde(default)]
    pub attempts: u32,
    /// Set once the entry has been handed to the channel; the server may
    /// have applied it even if no ack ever arrives
    #[serde(default)]
    pub sent: bool,
}

/// Why a drain stopped before emptying the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainHalt {
    /// The send function reported a failure
    Failed(ConnectivityError),
    /// No acknowledgement within the round-trip timeout
    TimedOut,
    /// The head entry is already in flight elsewhere
    Busy,
}

/// Result of [`OfflineQueue::drain`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Mutations acknowledged during this drain, in send order
    pub acked: Vec<MutationId>,
    /// Set when the drain stopped with entries remaining
    pub halted: Option<DrainHalt>,
}

/// Durable FIFO of pending mutations for one entity type
pub struct OfflineQueue {
    medium: Arc<dyn SharedMedium>,
    key: String,
    kind: EntityKind,
    config: QueueConfig,
    entries: VecDeque<QueueEntry>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("key", &self.key)
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    /// Open `owner`'s queue for `kind`, reloading entries persisted by a
    /// previous run of the same tab
    ///
    /// Each tab writes its own key, so tabs sharing a namespace never
    /// overwrite each other's pending mutations. Entries found in flight are
    /// reset to queued: their acknowledgement, if any, was lost with the
    /// previous connection.
    pub fn open(
        medium: Arc<dyn SharedMedium>,
        namespace: &str,
        owner: &TabId,
        kind: EntityKind,
        config: QueueConfig,
    ) -> Self {
        let key = format!("{}:queue:{}:{}", namespace, kind, owner);
        let mut queue = Self {
            medium,
            key,
            kind,
            config,
            entries: VecDeque::new(),
        };
        queue.load();
        queue
    }

    fn load(&mut self) {
        let raw = match self.medium.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, "No persisted queue, starting fresh");
                return;
            }
            Err(e) => {
                error!(key = %self.key, error = %e, "Failed to read persisted queue");
                return;
            }
        };

        match serde_json::from_str::<Vec<QueueEntry>>(&raw) {
            Ok(entries) => {
                self.entries = entries
                    .into_iter()
                    .map(|mut entry| {
                        if entry.state == EntryState::InFlight {
                            entry.state = EntryState::Queued;
                        }
                        entry
                    })
                    .collect();
                info!(key = %self.key, entries = self.entries.len(), "Reloaded offline queue");
            }
            Err(e) => {
                // Keep the unreadable log aside rather than overwrite it
                let quarantine = format!("{}:corrupt", self.key);
                error!(key = %self.key, error = %e, quarantine, "Persisted queue unreadable");
                if let Err(e) = self.medium.set(&quarantine, &raw) {
                    error!(error = %e, "Failed to quarantine unreadable queue");
                }
            }
        }
    }

    fn persist(&self) -> Result<(), StorageError> {
        let json = serde_json::to_string(&self.entries)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        self.medium.set(&self.key, &json).inspect_err(|e| {
            error!(key = %self.key, error = %e, "Failed to persist offline queue");
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Pending mutations in FIFO order
    pub fn mutations(&self) -> impl Iterator<Item = &Mutation> {
        self.entries.iter().map(|e| &e.mutation)
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// The mutation currently awaiting acknowledgement
    pub fn in_flight(&self) -> Option<&Mutation> {
        self.entries
            .front()
            .filter(|e| e.state == EntryState::InFlight)
            .map(|e| &e.mutation)
    }

    /// Whether a queued create of `entity_id` has ever gone out
    pub fn create_sent_for(&self, entity_id: &EntityId) -> bool {
        self.entries.iter().any(|e| {
            e.sent && e.mutation.op == MutationOp::Create && &e.mutation.entity_id == entity_id
        })
    }

    /// Whether any queued mutation targets `entity_id`
    pub fn has_pending_for(&self, entity_id: &EntityId) -> bool {
        self.mutations().any(|m| &m.entity_id == entity_id)
    }

    /// Set when the queue is above its high-water mark
    pub fn overflow(&self) -> Option<QueueOverflow> {
        (self.entries.len() > self.config.high_water_mark).then_some(QueueOverflow {
            len: self.entries.len(),
            high_water: self.config.high_water_mark,
        })
    }

    /// Append a mutation
    ///
    /// Never refuses: the entry is held in memory even if the write-through
    /// fails, and the error is returned for the caller to surface.
    pub fn enqueue(&mut self, mutation: Mutation) -> Result<(), StorageError> {
        debug!(
            kind = %self.kind,
            mutation_id = %mutation.mutation_id,
            op = %mutation.op,
            entity_id = %mutation.entity_id,
            "Enqueued mutation"
        );
        self.entries.push_back(QueueEntry {
            mutation,
            state: EntryState::Queued,
            attempts: 0,
            sent: false,
        });
        if self.entries.len() == self.config.high_water_mark + 1 {
            warn!(
                kind = %self.kind,
                len = self.entries.len(),
                high_water = self.config.high_water_mark,
                "Offline queue above high-water mark"
            );
        }
        self.persist()
    }

    /// Mark the head entry in flight and return it for sending
    ///
    /// Returns `None` when the queue is empty or the head is not in the
    /// queued state (in flight, or failed and awaiting retry).
    pub fn next_to_send(&mut self) -> Option<Mutation> {
        let head = self.entries.front_mut()?;
        if head.state != EntryState::Queued {
            return None;
        }
        head.state = EntryState::InFlight;
        head.sent = true;
        let mutation = head.mutation.clone();
        let _ = self.persist();
        Some(mutation)
    }

    /// Remove an acknowledged mutation
    pub fn ack(&mut self, mutation_id: &MutationId) -> Option<Mutation> {
        let removed = self.take(mutation_id)?;
        debug!(kind = %self.kind, %mutation_id, remaining = self.entries.len(), "Mutation acknowledged");
        Some(removed)
    }

    /// Remove a mutation without acknowledgement (rejection)
    pub fn remove(&mut self, mutation_id: &MutationId) -> Option<Mutation> {
        self.take(mutation_id)
    }

    fn take(&mut self, mutation_id: &MutationId) -> Option<Mutation> {
        let index = self
            .entries
            .iter()
            .position(|e| &e.mutation.mutation_id == mutation_id)?;
        let entry = self.entries.remove(index)?;
        let _ = self.persist();
        Some(entry.mutation)
    }

    /// Record a failed delivery of the in-flight head; returns its attempt count
    pub fn fail_in_flight(&mut self) -> Option<u32> {
        let head = self.entries.front_mut()?;
        if head.state != EntryState::InFlight {
            return None;
        }
        head.state = EntryState::Failed;
        head.attempts = head.attempts.saturating_add(1);
        let attempts = head.attempts;
        warn!(
            kind = %self.kind,
            mutation_id = %head.mutation.mutation_id,
            attempts,
            "Mutation delivery failed"
        );
        let _ = self.persist();
        Some(attempts)
    }

    /// Move a failed head back to queued so it is resent
    pub fn retry_failed(&mut self) -> bool {
        match self.entries.front_mut() {
            Some(head) if head.state == EntryState::Failed => {
                head.state = EntryState::Queued;
                let _ = self.persist();
                true
            }
            _ => false,
        }
    }

    /// Return an in-flight head to queued (the channel went away)
    pub fn reset_in_flight(&mut self) -> bool {
        match self.entries.front_mut() {
            Some(head) if head.state == EntryState::InFlight => {
                head.state = EntryState::Queued;
                let _ = self.persist();
                true
            }
            _ => false,
        }
    }

    /// Attempt count of the head entry
    pub fn head_attempts(&self) -> u32 {
        self.entries.front().map(|e| e.attempts).unwrap_or(0)
    }

    /// Point queued mutations at a reconciled id; returns how many changed
    pub fn remap_entity(&mut self, from: &EntityId, to: &EntityId) -> usize {
        let changed = self
            .entries
            .iter_mut()
            .map(|e| e.mutation.remap_entity(from, to))
            .filter(|changed| *changed)
            .count();
        if changed > 0 {
            debug!(kind = %self.kind, %from, %to, changed, "Remapped queued mutations");
            let _ = self.persist();
        }
        changed
    }

    /// Remove every queued mutation targeting `entity_id`
    pub fn remove_for_entity(&mut self, entity_id: &EntityId) -> Vec<Mutation> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| &e.mutation.entity_id == entity_id);
        self.entries = kept.into();
        if !removed.is_empty() {
            let _ = self.persist();
        }
        removed.into_iter().map(|e| e.mutation).collect()
    }

    /// Remove entries older than the configured maximum age
    ///
    /// The in-flight entry is never expired; its fate is decided by the ack.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<Mutation> {
        let Some(max_age) = self.config.max_age() else {
            return Vec::new();
        };
        let cutoff = now - max_age;

        let (expired, kept): (Vec<_>, Vec<_>) = self.entries.drain(..).partition(|e| {
            e.state != EntryState::InFlight && e.mutation.client_timestamp < cutoff
        });
        self.entries = kept.into();

        if !expired.is_empty() {
            warn!(kind = %self.kind, expired = expired.len(), "Expired stale queued mutations");
            let _ = self.persist();
        }
        expired.into_iter().map(|e| e.mutation).collect()
    }

    /// Send queued mutations in order until empty or a send does not succeed
    ///
    /// Standalone delivery loop for callers that can await each round trip.
    /// An event loop that multiplexes acks with other work steps the same
    /// state machine itself through [`next_to_send`](Self::next_to_send),
    /// [`ack`](Self::ack) and [`fail_in_flight`](Self::fail_in_flight).
    ///
    /// `send` resolves `Ok(())` once the server acknowledged the mutation.
    /// A failure or a round-trip longer than the ack timeout halts the drain
    /// and leaves the head in place (failed) for a later drain.
    pub async fn drain<F, Fut>(&mut self, mut send: F) -> DrainOutcome
    where
        F: FnMut(Mutation) -> Fut,
        Fut: Future<Output = Result<(), ConnectivityError>>,
    {
        let mut outcome = DrainOutcome::default();
        let timeout = self.config.ack_timeout();

        loop {
            self.retry_failed();
            let Some(mutation) = self.next_to_send() else {
                if self.head().is_some() {
                    outcome.halted = Some(DrainHalt::Busy);
                }
                return outcome;
            };
            let mutation_id = mutation.mutation_id;

            match tokio::time::timeout(timeout, send(mutation)).await {
                Ok(Ok(())) => {
                    self.ack(&mutation_id);
                    outcome.acked.push(mutation_id);
                }
                Ok(Err(e)) => {
                    self.fail_in_flight();
                    outcome.halted = Some(DrainHalt::Failed(e));
                    return outcome;
                }
                Err(_) => {
                    self.fail_in_flight();
                    outcome.halted = Some(DrainHalt::TimedOut);
                    return outcome;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryMedium;
    use serde_json::json;
    use std::sync::Mutex;
    fn medium() -> Arc<dyn SharedMedium> {
        Arc::new(MemoryMedium::new())
    }

    fn queue(medium: &Arc<dyn SharedMedium>) -> OfflineQueue {
        open_as(medium, "tab-a", QueueConfig::default())
    }

    fn open_as(medium: &Arc<dyn SharedMedium>, tab: &str, config: QueueConfig) -> OfflineQueue {
        OfflineQueue::open(
            medium.clone(),
            "tabsync",
            &TabId::new(tab),
            EntityKind::Order,
            config,
        )
    }

    fn mutation(op: MutationOp, id: &EntityId, payload: serde_json::Value) -> Mutation {
        Mutation::new(
            EntityKind::Order,
            op,
            id.clone(),
            payload,
            TabId::new("tab-a"),
            Utc::now(),
        )
    }

    #[test]
    fn test_fifo_one_in_flight() {
        let medium = medium();
        let mut q = queue(&medium);
        let id = EntityId::new("o-1");
        let first = mutation(MutationOp::Update, &id, json!({"x": 1}));
        let second = mutation(MutationOp::Update, &id, json!({"x": 2}));
        q.enqueue(first.clone()).unwrap();
        q.enqueue(second.clone()).unwrap();

        assert_eq!(q.next_to_send().unwrap().mutation_id, first.mutation_id);
        assert!(q.next_to_send().is_none(), "head is in flight");

        q.ack(&first.mutation_id).unwrap();
        assert_eq!(q.next_to_send().unwrap().mutation_id, second.mutation_id);
    }

    #[test]
    fn test_failure_keeps_position() {
        let medium = medium();
        let mut q = queue(&medium);
        let id = EntityId::new("o-1");
        let first = mutation(MutationOp::Update, &id, json!({"x": 1}));
        q.enqueue(first.clone()).unwrap();
        q.enqueue(mutation(MutationOp::Update, &id, json!({"x": 2}))).unwrap();

        q.next_to_send().unwrap();
        assert_eq!(q.fail_in_flight(), Some(1));
        assert!(q.next_to_send().is_none(), "failed head waits for retry");

        assert!(q.retry_failed());
        assert_eq!(q.next_to_send().unwrap().mutation_id, first.mutation_id);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_sent_flag_outlives_failure_and_reload() {
        let medium = medium();
        let temp = EntityId::temporary();
        {
            let mut q = queue(&medium);
            q.enqueue(mutation(MutationOp::Create, &temp, json!({}))).unwrap();
            assert!(!q.create_sent_for(&temp));
            q.next_to_send().unwrap();
            q.fail_in_flight().unwrap();
            assert!(q.retry_failed());
            assert!(q.create_sent_for(&temp), "a retried create was already on the wire");
        }
        assert!(queue(&medium).create_sent_for(&temp));
    }

    #[test]
    fn test_reload_resets_in_flight() {
        let medium = medium();
        let pending = mutation(MutationOp::Create, &EntityId::temporary(), json!({}));
        {
            let mut q = queue(&medium);
            q.enqueue(pending.clone()).unwrap();
            q.next_to_send().unwrap();
        }

        let mut reloaded = queue(&medium);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.head().unwrap().state, EntryState::Queued);
        assert_eq!(reloaded.next_to_send().unwrap(), pending);
    }

    #[test]
    fn test_corrupt_log_is_quarantined() {
        let medium = medium();
        medium.set("tabsync:queue:order:tab-a", "not json").unwrap();

        let q = queue(&medium);
        assert!(q.is_empty());
        assert_eq!(
            medium.get("tabsync:queue:order:tab-a:corrupt").unwrap().as_deref(),
            Some("not json")
        );
    }

    #[test]
    fn test_remap_rewrites_pending_mutations() {
        let medium = medium();
        let mut q = queue(&medium);
        let temp = EntityId::temporary();
        q.enqueue(mutation(MutationOp::Update, &temp, json!({"x": 1}))).unwrap();
        q.enqueue(mutation(MutationOp::Update, &EntityId::new("o-7"), json!({}))).unwrap();

        assert_eq!(q.remap_entity(&temp, &EntityId::new("o-99")), 1);
        assert!(q.has_pending_for(&EntityId::new("o-99")));
        assert!(!q.has_pending_for(&temp));

        let reloaded = queue(&medium);
        assert!(reloaded.has_pending_for(&EntityId::new("o-99")));
    }

    #[test]
    fn test_overflow_still_accepts() {
        let medium = medium();
        let config = QueueConfig {
            high_water_mark: 2,
            ..Default::default()
        };
        let mut q = open_as(&medium, "tab-a", config);
        let id = EntityId::new("o-1");
        for _ in 0..2 {
            q.enqueue(mutation(MutationOp::Update, &id, json!({}))).unwrap();
        }
        assert!(q.overflow().is_none());

        q.enqueue(mutation(MutationOp::Update, &id, json!({}))).unwrap();
        assert_eq!(
            q.overflow(),
            Some(QueueOverflow {
                len: 3,
                high_water: 2
            })
        );
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_expire_respects_knob() {
        let medium = medium();
        let mut q = queue(&medium);
        let mut old = mutation(MutationOp::Update, &EntityId::new("o-1"), json!({}));
        old.client_timestamp = Utc::now() - chrono::Duration::days(3);
        q.enqueue(old.clone()).unwrap();

        assert!(q.expire(Utc::now()).is_empty(), "expiry disabled by default");

        let config = QueueConfig {
            max_age_secs: Some(86_400),
            ..Default::default()
        };
        let mut q = open_as(&medium, "tab-a", config);
        let expired = q.expire(Utc::now());
        assert_eq!(expired, vec![old]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_tabs_sharing_a_namespace_keep_their_own_entries() {
        let medium = medium();
        let from_a = mutation(MutationOp::Create, &EntityId::temporary(), json!({}));
        let mut from_b = mutation(MutationOp::Create, &EntityId::temporary(), json!({}));
        from_b.origin_tab = TabId::new("tab-b");
        {
            let mut a = open_as(&medium, "tab-a", QueueConfig::default());
            let mut b = open_as(&medium, "tab-b", QueueConfig::default());
            a.enqueue(from_a.clone()).unwrap();
            b.enqueue(from_b.clone()).unwrap();
            // b persisting again must not clobber a's entry
            b.next_to_send().unwrap();
        }

        let a = open_as(&medium, "tab-a", QueueConfig::default());
        let b = open_as(&medium, "tab-b", QueueConfig::default());
        assert_eq!(a.mutations().cloned().collect::<Vec<_>>(), vec![from_a]);
        assert_eq!(b.mutations().cloned().collect::<Vec<_>>(), vec![from_b]);
    }

    #[test]
    fn test_remove_for_entity() {
        let medium = medium();
        let mut q = queue(&medium);
        let temp = EntityId::temporary();
        q.enqueue(mutation(MutationOp::Create, &temp, json!({}))).unwrap();
        q.enqueue(mutation(MutationOp::Update, &EntityId::new("o-2"), json!({}))).unwrap();
        q.enqueue(mutation(MutationOp::Update, &temp, json!({}))).unwrap();

        let removed = q.remove_for_entity(&temp);
        assert_eq!(removed.len(), 2);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_sends_in_order() {
        let medium = medium();
        let mut q = queue(&medium);
        let id = EntityId::new("o-1");
        let expected: Vec<MutationId> = (0..3)
            .map(|x| {
                let m = mutation(MutationOp::Update, &id, json!({ "x": x }));
                let mid = m.mutation_id;
                q.enqueue(m).unwrap();
                mid
            })
            .collect();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let outcome = q
            .drain(|m| {
                let sent = sent.clone();
                async move {
                    sent.lock().unwrap().push(m.mutation_id);
                    Ok(())
                }
            })
            .await;

        assert_eq!(outcome.acked, expected);
        assert!(outcome.halted.is_none());
        assert_eq!(*sent.lock().unwrap(), expected);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_drain_halts_on_failure() {
        let medium = medium();
        let mut q = queue(&medium);
        let id = EntityId::new("o-1");
        q.enqueue(mutation(MutationOp::Update, &id, json!({}))).unwrap();
        q.enqueue(mutation(MutationOp::Update, &id, json!({}))).unwrap();

        let outcome = q
            .drain(|_| async { Err(ConnectivityError::NotConnected) })
            .await;
        assert_eq!(
            outcome.halted,
            Some(DrainHalt::Failed(ConnectivityError::NotConnected))
        );
        assert_eq!(q.len(), 2);
        assert_eq!(q.head_attempts(), 1);

        // A later drain resumes from the same head
        let outcome = q.drain(|_| async { Ok(()) }).await;
        assert_eq!(outcome.acked.len(), 2);
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_without_ack() {
        let medium = medium();
        let mut q = queue(&medium);
        q.enqueue(mutation(MutationOp::Delete, &EntityId::new("5"), json!(null)))
            .unwrap();

        let outcome = q
            .drain(|_| std::future::pending::<Result<(), ConnectivityError>>())
            .await;
        assert_eq!(outcome.halted, Some(DrainHalt::TimedOut));
        assert_eq!(q.head().unwrap().state, EntryState::Failed);
    }
}
