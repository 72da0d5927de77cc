//! Generic entity store

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use tabsync_broadcast::BroadcastBus;
use tabsync_core::{
    BroadcastMessage, BusAction, Clock, Entity, EntityChange, EntityId, Mutation, MutationId,
    MutationOp, MutationRejected, ProtocolError, SharedMedium, SyncStatus, TabId, TabsyncError,
    TabsyncResult, decode_entity, shallow_merge,
};
use tabsync_storage::{CacheLayer, OfflineQueue, QueueConfig};

use crate::issue::{IssueId, IssueKind, SyncIssue};
use crate::snapshot::SnapshotSource;

/// Where a remote change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// The authoritative server channel
    Channel,
    /// A sibling tab; a latency-hiding hint only
    Broadcast,
}

/// Effect of applying a change to the visible map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    /// Already in the target state, or nothing to apply to
    Ignored,
}

/// Everything a store needs from its tab
#[derive(Clone)]
pub struct StoreContext {
    pub tab_id: TabId,
    pub medium: Arc<dyn SharedMedium>,
    pub bus: Arc<BroadcastBus>,
    pub clock: Arc<dyn Clock>,
    /// Namespace of this tab's cache and queue keys
    pub namespace: String,
    pub queue: QueueConfig,
}

/// Canonical per-tab collection of one entity type
pub struct EntityStore<T: Entity> {
    tab_id: TabId,
    /// What the tab shows: confirmed + pending local + hints
    entities: BTreeMap<EntityId, T>,
    /// Last known-good server state
    confirmed: BTreeMap<EntityId, T>,
    queue: OfflineQueue,
    cache: CacheLayer,
    bus: Arc<BroadcastBus>,
    clock: Arc<dyn Clock>,
    online: bool,
    issues: Vec<SyncIssue>,
    next_issue_seq: u64,
    status: watch::Sender<SyncStatus>,
    last_sync: Option<DateTime<Utc>>,
}

impl<T: Entity> std::fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("kind", &T::KIND)
            .field("entities", &self.entities.len())
            .field("pending", &self.queue.len())
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: Entity> EntityStore<T> {
    /// Open the store, hydrating from the cache and the persisted queue
    ///
    /// Pending mutations from a previous run are overlaid on the cached
    /// snapshot, so the tab starts exactly where it left off even offline.
    #[instrument(skip(ctx), fields(kind = %T::KIND, tab = %ctx.tab_id.short_id()))]
    pub fn open(ctx: &StoreContext) -> Self {
        let cache = CacheLayer::new(ctx.medium.clone(), ctx.namespace.clone());
        let queue = OfflineQueue::open(
            ctx.medium.clone(),
            &ctx.namespace,
            &ctx.tab_id,
            T::KIND,
            ctx.queue.clone(),
        );

        let confirmed: BTreeMap<EntityId, T> = cache
            .load::<T>(T::KIND.as_str())
            .map(|snapshot| {
                snapshot
                    .payload
                    .into_iter()
                    .map(|e| (e.id().clone(), e))
                    .collect()
            })
            .unwrap_or_default();

        let (status, _) = watch::channel(SyncStatus::Offline);
        let mut store = Self {
            tab_id: ctx.tab_id.clone(),
            entities: confirmed.clone(),
            confirmed,
            queue,
            cache,
            bus: ctx.bus.clone(),
            clock: ctx.clock.clone(),
            online: false,
            issues: Vec::new(),
            next_issue_seq: 1,
            status,
            last_sync: None,
        };

        for id in store.pending_ids() {
            store.rebuild(&id);
        }
        store.refresh_status();

        info!(
            entities = store.entities.len(),
            pending = store.queue.len(),
            "Hydrated store"
        );
        store
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Visible entities ordered by id
    pub fn list(&self) -> Vec<T> {
        self.entities.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Last known-good server version of an entity
    pub fn confirmed(&self, id: &EntityId) -> Option<&T> {
        self.confirmed.get(id)
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn issues(&self) -> &[SyncIssue] {
        &self.issues
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    // ========================================================================
    // Local mutations
    // ========================================================================

    /// Apply a local change optimistically
    ///
    /// The visible map changes before this returns; the mutation is then
    /// queued and announced to sibling tabs. Creates without an id (neither
    /// `entity_id` nor `payload.id`) get a temporary one. Returns the id of
    /// the affected entity.
    #[instrument(skip(self, payload), fields(kind = %T::KIND))]
    pub fn apply_local(
        &mut self,
        op: MutationOp,
        entity_id: Option<EntityId>,
        payload: Value,
    ) -> TabsyncResult<EntityId> {
        let (id, payload) = match op {
            MutationOp::Create => {
                let id = entity_id
                    .or_else(|| {
                        payload
                            .get("id")
                            .and_then(|v| serde_json::from_value(v.clone()).ok())
                    })
                    .unwrap_or_else(EntityId::temporary);
                if self.entities.contains_key(&id) {
                    return Err(TabsyncError::DuplicateEntity(id));
                }
                let mut fields = match payload {
                    Value::Object(fields) => fields,
                    _ => {
                        return Err(ProtocolError::InvalidPayload(
                            "create payload must be an object".into(),
                        )
                        .into());
                    }
                };
                fields.insert("id".into(), Value::String(id.as_str().to_string()));
                let payload = Value::Object(fields);
                let entity: T = decode_entity(&payload)?;
                self.entities.insert(id.clone(), entity);
                (id, payload)
            }
            MutationOp::Update => {
                let id = entity_id
                    .ok_or_else(|| ProtocolError::InvalidPayload("update needs an id".into()))?;
                let current = self
                    .entities
                    .get(&id)
                    .ok_or_else(|| TabsyncError::UnknownEntity(id.clone()))?;
                let merged = shallow_merge(current, &payload)?;
                self.entities.insert(id.clone(), merged);
                (id, strip_id(payload))
            }
            MutationOp::Delete => {
                let id = entity_id
                    .ok_or_else(|| ProtocolError::InvalidPayload("delete needs an id".into()))?;
                if self.entities.remove(&id).is_none() {
                    return Err(TabsyncError::UnknownEntity(id));
                }
                if self.cancel_unsent_create(&id) {
                    self.announce(BusAction::Delete, &id, Value::Null, None);
                    self.refresh_status();
                    return Ok(id);
                }
                (id, Value::Null)
            }
        };

        let mutation = Mutation::new(
            T::KIND,
            op,
            id.clone(),
            payload.clone(),
            self.tab_id.clone(),
            self.clock.now_utc(),
        );
        if let Err(e) = self.queue.enqueue(mutation) {
            warn!(error = %e, entity_id = %id, "Queued mutation is not durable");
        }

        self.announce(bus_action(op), &id, payload, None);
        self.refresh_status();
        Ok(id)
    }

    /// Drop the queued create of a never-sent temporary entity
    ///
    /// Returns true if the entity only ever existed locally, in which case
    /// nothing needs to reach the server. Once the create has been sent the
    /// server may hold the entity, so the delete must be queued behind it and
    /// follow the id remap.
    fn cancel_unsent_create(&mut self, id: &EntityId) -> bool {
        if !id.is_temporary() || self.queue.create_sent_for(id) {
            return false;
        }
        let dropped = self.queue.remove_for_entity(id);
        debug!(entity_id = %id, dropped = dropped.len(), "Cancelled unsent local entity");
        true
    }

    // ========================================================================
    // Remote changes
    // ========================================================================

    /// Merge a remote change idempotently
    ///
    /// Create inserts if absent, update shallow-merges if present (an update
    /// for an unknown entity is dropped), delete removes if present. Channel
    /// changes also update the confirmed state and keep pending local
    /// mutations on top; broadcast changes touch only the visible map.
    #[instrument(skip(self, payload), fields(kind = %T::KIND))]
    pub fn apply_remote(
        &mut self,
        op: MutationOp,
        entity_id: &EntityId,
        payload: &Value,
        source: ChangeSource,
    ) -> Result<Applied, ProtocolError> {
        let applied = match source {
            ChangeSource::Broadcast => apply_op(&mut self.entities, op, entity_id, payload)?,
            ChangeSource::Channel => {
                apply_op(&mut self.confirmed, op, entity_id, payload)?;
                let rebase = self.queue.has_pending_for(entity_id)
                    && (self.confirmed.contains_key(entity_id) || op == MutationOp::Delete);
                let applied = if rebase {
                    self.rebuild(entity_id)
                } else {
                    apply_op(&mut self.entities, op, entity_id, payload)?
                };
                self.last_sync = Some(self.clock.now_utc());
                self.save_cache();
                applied
            }
        };
        debug!(entity_id = %entity_id, %op, ?source, ?applied, "Applied remote change");
        Ok(applied)
    }

    /// Apply a sibling tab's broadcast, if it concerns this entity type
    pub fn apply_broadcast(&mut self, message: &BroadcastMessage) -> Result<Applied, ProtocolError> {
        let change: EntityChange = serde_json::from_value(message.data.clone())
            .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
        if change.entity_type != T::KIND {
            return Ok(Applied::Ignored);
        }

        match message.action {
            BusAction::Create => self.apply_remote(
                MutationOp::Create,
                &change.entity_id,
                &change.payload,
                ChangeSource::Broadcast,
            ),
            BusAction::Update => self.apply_remote(
                MutationOp::Update,
                &change.entity_id,
                &change.payload,
                ChangeSource::Broadcast,
            ),
            BusAction::Delete => self.apply_remote(
                MutationOp::Delete,
                &change.entity_id,
                &change.payload,
                ChangeSource::Broadcast,
            ),
            BusAction::Reconcile => {
                let server_id = change.server_id.ok_or_else(|| {
                    ProtocolError::InvalidPayload("reconcile without serverId".into())
                })?;
                Ok(self.rename_visible(&change.entity_id, &server_id))
            }
        }
    }

    /// Move a visible entity from a temporary id to its server id
    ///
    /// Renames when only the temporary id is known, drops the temporary entry
    /// when both are known, and does nothing otherwise.
    fn rename_visible(&mut self, from: &EntityId, to: &EntityId) -> Applied {
        if from == to {
            return Applied::Ignored;
        }
        let Some(mut entity) = self.entities.remove(from) else {
            return Applied::Ignored;
        };
        if self.entities.contains_key(to) {
            return Applied::Removed;
        }
        entity.set_id(to.clone());
        self.entities.insert(to.clone(), entity);
        Applied::Updated
    }

    // ========================================================================
    // Acknowledgement, rejection, expiry
    // ========================================================================

    /// Whether `mutation_id` is waiting in this store's queue
    pub fn owns_mutation(&self, mutation_id: &MutationId) -> bool {
        self.queue
            .mutations()
            .any(|m| &m.mutation_id == mutation_id)
    }

    /// Handle a positive acknowledgement
    ///
    /// Removes the mutation from the queue, folds it into the confirmed state
    /// and, for a create with a server id, reconciles the temporary id
    /// everywhere (visible map, queued mutations, sibling tabs). Returns the
    /// entity's final id, or `None` for an unknown (duplicate) ack.
    #[instrument(skip(self), fields(kind = %T::KIND))]
    pub fn handle_ack(
        &mut self,
        mutation_id: &MutationId,
        server_id: Option<&EntityId>,
    ) -> Option<EntityId> {
        let mutation = self.queue.ack(mutation_id)?;
        let mut id = mutation.entity_id.clone();

        if mutation.op == MutationOp::Create {
            if let Some(server_id) = server_id.filter(|s| *s != &id) {
                self.reconcile(&id, server_id);
                id = server_id.clone();
            }
        }

        match mutation.op {
            MutationOp::Create => {
                if !self.confirmed.contains_key(&id) {
                    // The create as sent, not the visible entity with later edits
                    let entity = decode_entity::<T>(&mutation.payload)
                        .ok()
                        .or_else(|| self.entities.get(&id).cloned());
                    if let Some(mut entity) = entity {
                        entity.set_id(id.clone());
                        self.confirmed.insert(id.clone(), entity);
                    }
                }
            }
            MutationOp::Update => {
                if let Some(current) = self.confirmed.get(&id) {
                    match shallow_merge(current, &mutation.payload) {
                        Ok(merged) => {
                            self.confirmed.insert(id.clone(), merged);
                        }
                        Err(e) => warn!(error = %e, entity_id = %id, "Acked patch no longer applies"),
                    }
                }
            }
            MutationOp::Delete => {
                self.confirmed.remove(&id);
            }
        }

        if self.queue.has_pending_for(&id) && self.confirmed.contains_key(&id) {
            self.rebuild(&id);
        }

        self.last_sync = Some(self.clock.now_utc());
        self.save_cache();
        self.refresh_status();
        debug!(%mutation_id, entity_id = %id, remaining = self.queue.len(), "Mutation confirmed");
        Some(id)
    }

    /// Replace a temporary id with the server id across local state
    fn reconcile(&mut self, temp_id: &EntityId, server_id: &EntityId) {
        self.rename_visible(temp_id, server_id);
        self.queue.remap_entity(temp_id, server_id);
        self.announce(
            BusAction::Reconcile,
            temp_id,
            Value::Null,
            Some(server_id.clone()),
        );
        info!(%temp_id, %server_id, "Reconciled temporary id");
    }

    /// Handle a server rejection: drop the mutation and roll back
    #[instrument(skip(self), fields(kind = %T::KIND))]
    pub fn handle_reject(
        &mut self,
        mutation_id: &MutationId,
        reason: &str,
    ) -> Option<MutationRejected> {
        let mutation = self.queue.remove(mutation_id)?;
        let issue = self.roll_back(mutation, IssueKind::Rejected, reason.to_string());
        Some(issue.to_rejection())
    }

    /// Expire queued mutations older than the configured maximum age
    pub fn expire_stale(&mut self) -> Vec<MutationRejected> {
        let now = self.clock.now_utc();
        self.queue
            .expire(now)
            .into_iter()
            .map(|m| {
                self.roll_back(m, IssueKind::Expired, "expired in offline queue".into())
                    .to_rejection()
            })
            .collect()
    }

    fn roll_back(&mut self, mutation: Mutation, kind: IssueKind, reason: String) -> SyncIssue {
        let id = mutation.entity_id.clone();

        if mutation.op == MutationOp::Create {
            // Later mutations of a never-created entity cannot succeed either
            let dropped = self.queue.remove_for_entity(&id);
            self.entities.remove(&id);
            self.announce(BusAction::Delete, &id, Value::Null, None);
            debug!(entity_id = %id, dropped = dropped.len(), "Rolled back local create");
        } else if self.confirmed.contains_key(&id) || mutation.op == MutationOp::Delete {
            match self.rebuild(&id) {
                Applied::Removed => self.announce(BusAction::Delete, &id, Value::Null, None),
                Applied::Ignored => {}
                Applied::Inserted | Applied::Updated => {
                    let full = self
                        .entities
                        .get(&id)
                        .and_then(|e| serde_json::to_value(e).ok())
                        .unwrap_or(Value::Null);
                    self.announce(BusAction::Update, &id, full, None);
                }
            }
        } else {
            debug!(entity_id = %id, "No known-good state to roll back to");
        }

        let issue = SyncIssue {
            id: IssueId {
                kind: T::KIND,
                seq: self.next_issue_seq,
            },
            kind,
            entity_type: T::KIND,
            entity_id: id,
            mutation_id: mutation.mutation_id,
            op: mutation.op,
            reason,
            at: self.clock.now_utc(),
        };
        self.next_issue_seq += 1;
        warn!(
            entity_id = %issue.entity_id,
            mutation_id = %issue.mutation_id,
            ?kind,
            reason = %issue.reason,
            "Local mutation rolled back"
        );
        self.issues.push(issue.clone());
        self.refresh_status();
        issue
    }

    /// Dismiss a surfaced issue; returns whether it existed
    pub fn dismiss_issue(&mut self, issue_id: IssueId) -> bool {
        let before = self.issues.len();
        self.issues.retain(|i| i.id != issue_id);
        let removed = self.issues.len() != before;
        if removed {
            self.refresh_status();
        }
        removed
    }

    pub fn clear_issues(&mut self) {
        self.issues.clear();
        self.refresh_status();
    }

    // ========================================================================
    // Queue delivery (driven by the engine)
    // ========================================================================

    /// Mark the queue head in flight and return it for sending
    pub fn next_to_send(&mut self) -> Option<Mutation> {
        self.queue.next_to_send()
    }

    pub fn in_flight(&self) -> Option<&Mutation> {
        self.queue.in_flight()
    }

    /// Record a failed or timed-out delivery; returns the attempt count
    pub fn fail_in_flight(&mut self) -> Option<u32> {
        self.queue.fail_in_flight()
    }

    pub fn retry_failed(&mut self) -> bool {
        self.queue.retry_failed()
    }

    /// The channel closed: the in-flight head goes back to queued
    pub fn reset_in_flight(&mut self) -> bool {
        self.queue.reset_in_flight()
    }

    // ========================================================================
    // Snapshots and connectivity
    // ========================================================================

    /// Replace the collection with a full server snapshot
    ///
    /// Pending local mutations are re-applied on top (last writer wins by
    /// client timestamp against the entity's `updated_at`); nothing queued is
    /// discarded. The snapshot supersedes the cache.
    #[instrument(skip(self, snapshot), fields(kind = %T::KIND, entities = snapshot.len()))]
    pub fn replace_with_snapshot(&mut self, snapshot: Vec<T>) {
        self.confirmed = snapshot
            .into_iter()
            .map(|e| (e.id().clone(), e))
            .collect();
        self.entities = self.confirmed.clone();
        for id in self.pending_ids() {
            self.rebuild(&id);
        }
        self.last_sync = Some(self.clock.now_utc());
        self.save_cache();
        self.refresh_status();
        info!(visible = self.entities.len(), "Applied snapshot");
    }

    /// Fetch a snapshot from `source` and apply it
    pub async fn fetch_snapshot(&mut self, source: &dyn SnapshotSource<T>) -> TabsyncResult<()> {
        let snapshot = source.fetch().await?;
        self.replace_with_snapshot(snapshot);
        Ok(())
    }

    pub fn set_online(&mut self, online: bool) {
        if self.online != online {
            self.online = online;
            self.refresh_status();
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn pending_ids(&self) -> Vec<EntityId> {
        let mut seen = BTreeSet::new();
        self.queue
            .mutations()
            .filter(|m| seen.insert(m.entity_id.clone()))
            .map(|m| m.entity_id.clone())
            .collect()
    }

    /// Recompute a visible entity as confirmed state plus pending mutations
    fn rebuild(&mut self, id: &EntityId) -> Applied {
        let mut current = self.confirmed.get(id).cloned();

        for m in self.queue.mutations().filter(|m| &m.entity_id == id) {
            // Server state newer than the local edit wins
            let server_newer = current
                .as_ref()
                .and_then(|c| c.updated_at())
                .is_some_and(|at| at > m.client_timestamp);
            if server_newer {
                continue;
            }
            match m.op {
                MutationOp::Create => match decode_with_id::<T>(&m.payload, id) {
                    Ok(entity) => current = Some(entity),
                    Err(e) => warn!(error = %e, entity_id = %id, "Queued create no longer decodes"),
                },
                MutationOp::Update => {
                    if let Some(base) = current.as_ref() {
                        match shallow_merge(base, &m.payload) {
                            Ok(merged) => current = Some(merged),
                            Err(e) => {
                                warn!(error = %e, entity_id = %id, "Queued patch no longer applies")
                            }
                        }
                    }
                }
                MutationOp::Delete => current = None,
            }
        }

        let previous = match current {
            Some(entity) => self.entities.insert(id.clone(), entity),
            None => self.entities.remove(id),
        };
        match (previous.is_some(), self.entities.contains_key(id)) {
            (false, true) => Applied::Inserted,
            (true, true) => {
                if previous.as_ref() == self.entities.get(id) {
                    Applied::Ignored
                } else {
                    Applied::Updated
                }
            }
            (true, false) => Applied::Removed,
            (false, false) => Applied::Ignored,
        }
    }

    fn announce(&self, action: BusAction, id: &EntityId, payload: Value, server_id: Option<EntityId>) {
        let change = EntityChange {
            entity_type: T::KIND,
            entity_id: id.clone(),
            payload,
            server_id,
        };
        let data = match serde_json::to_value(&change) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Failed to encode broadcast");
                return;
            }
        };
        if let Err(e) = self.bus.publish(action, data) {
            warn!(error = %e, ?action, "Failed to broadcast change");
        }
    }

    fn save_cache(&self) {
        let collection: Vec<T> = self.confirmed.values().cloned().collect();
        if let Err(e) = self
            .cache
            .save(T::KIND.as_str(), &collection, self.clock.now_utc())
        {
            warn!(error = %e, "Failed to write cache snapshot");
        }
    }

    fn refresh_status(&self) {
        let has_error = !self.issues.is_empty() || self.queue.overflow().is_some();
        let next = SyncStatus::derive(has_error, self.queue.len(), self.online);
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(kind = %T::KIND, from = %current, to = %next, "Sync status changed");
                *current = next;
                true
            }
        });
    }
}

/// Idempotent create/update/delete against one map
fn apply_op<T: Entity>(
    map: &mut BTreeMap<EntityId, T>,
    op: MutationOp,
    id: &EntityId,
    payload: &Value,
) -> Result<Applied, ProtocolError> {
    match op {
        MutationOp::Create => {
            if map.contains_key(id) {
                return Ok(Applied::Ignored);
            }
            map.insert(id.clone(), decode_with_id(payload, id)?);
            Ok(Applied::Inserted)
        }
        MutationOp::Update => {
            let Some(current) = map.get(id) else {
                return Ok(Applied::Ignored);
            };
            let merged = shallow_merge(current, payload)?;
            if &merged == current {
                return Ok(Applied::Ignored);
            }
            map.insert(id.clone(), merged);
            Ok(Applied::Updated)
        }
        MutationOp::Delete => Ok(if map.remove(id).is_some() {
            Applied::Removed
        } else {
            Applied::Ignored
        }),
    }
}

/// Decode a create payload, taking the id from the change rather than the body
fn decode_with_id<T: Entity>(payload: &Value, id: &EntityId) -> Result<T, ProtocolError> {
    let mut payload = payload.clone();
    if let Value::Object(fields) = &mut payload {
        fields.insert("id".into(), Value::String(id.as_str().to_string()));
    }
    let mut entity: T = decode_entity(&payload)?;
    entity.set_id(id.clone());
    Ok(entity)
}

fn bus_action(op: MutationOp) -> BusAction {
    match op {
        MutationOp::Create => BusAction::Create,
        MutationOp::Update => BusAction::Update,
        MutationOp::Delete => BusAction::Delete,
    }
}

fn strip_id(payload: Value) -> Value {
    match payload {
        Value::Object(mut fields) => {
            fields.remove("id");
            Value::Object(fields)
        }
        other => other,
    }
}
