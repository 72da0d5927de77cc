//! Notification center
//!
//! Read/unread bookkeeping on top of the notification store, plus the
//! side-effectful presentation of newly arriving notifications (toast, sound,
//! desktop popup; whatever the [`Presenter`] does).
//!
//! A notification is presented at most once per id, and only when it first
//! arrives over the authoritative channel. Hydrated, snapshot and sibling-tab
//! data is never presented: the tab that received it from the server already
//! did.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tracing::{debug, info};

use tabsync_core::{
    EntityId, MutationOp, Notification, ProtocolError, Severity, TabsyncError, TabsyncResult,
};

use crate::store::{Applied, ChangeSource, EntityStore, StoreContext};

/// Surfaces a notification to the user
pub trait Presenter: Send + Sync {
    fn present(&self, notification: &Notification);
}

/// Presenter that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn present(&self, notification: &Notification) {
        info!(
            id = %notification.id,
            severity = ?notification.severity,
            category = %notification.category,
            title = %notification.title,
            "Notification"
        );
    }
}

/// Presenter that records what it was asked to show
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.shown.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, notification: &Notification) {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(notification.clone());
    }
}

/// Notification store with read state and presentation
pub struct NotificationCenter {
    inner: EntityStore<Notification>,
    presenter: Arc<dyn Presenter>,
    presented: HashSet<EntityId>,
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("inner", &self.inner)
            .field("presented", &self.presented.len())
            .finish_non_exhaustive()
    }
}

impl NotificationCenter {
    pub fn open(ctx: &StoreContext, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            inner: EntityStore::open(ctx),
            presenter,
            presented: HashSet::new(),
        }
    }

    /// Merge a remote change, presenting notifications new to this tab
    pub fn apply_remote(
        &mut self,
        op: MutationOp,
        entity_id: &EntityId,
        payload: &Value,
        source: ChangeSource,
    ) -> Result<Applied, ProtocolError> {
        let applied = self.inner.apply_remote(op, entity_id, payload, source)?;
        if source == ChangeSource::Channel
            && applied == Applied::Inserted
            && self.presented.insert(entity_id.clone())
        {
            if let Some(notification) = self.inner.get(entity_id) {
                debug!(id = %entity_id, "Presenting notification");
                self.presenter.present(notification);
            }
        }
        Ok(applied)
    }

    /// Apply a server-pushed notification frame
    pub fn receive(&mut self, notification: &Notification) -> Result<Applied, ProtocolError> {
        let payload = serde_json::to_value(notification)
            .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
        self.apply_remote(
            MutationOp::Create,
            &notification.id,
            &payload,
            ChangeSource::Channel,
        )
    }

    /// Raise a notification from this tab
    pub fn notify(
        &mut self,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        category: impl Into<String>,
    ) -> TabsyncResult<EntityId> {
        let payload = json!({
            "title": title.into(),
            "message": message.into(),
            "severity": severity,
            "category": category.into(),
            "read": false,
        });
        self.inner.apply_local(MutationOp::Create, None, payload)
    }

    /// Mark one notification read; a no-op if it already is
    pub fn mark_read(&mut self, id: &EntityId) -> TabsyncResult<bool> {
        let already_read = match self.inner.get(id) {
            Some(n) => n.read,
            None => return Err(TabsyncError::UnknownEntity(id.clone())),
        };
        if already_read {
            return Ok(false);
        }
        self.inner
            .apply_local(MutationOp::Update, Some(id.clone()), json!({ "read": true }))?;
        Ok(true)
    }

    /// Mark every unread notification read; returns how many changed
    pub fn mark_all_read(&mut self) -> TabsyncResult<usize> {
        let unread: Vec<EntityId> = self
            .inner
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id.clone())
            .collect();
        for id in &unread {
            self.inner
                .apply_local(MutationOp::Update, Some(id.clone()), json!({ "read": true }))?;
        }
        Ok(unread.len())
    }

    pub fn unread_count(&self) -> usize {
        self.inner.iter().filter(|n| !n.read).count()
    }

    pub fn by_category(&self, category: &str) -> Vec<&Notification> {
        self.inner
            .iter()
            .filter(|n| n.category == category)
            .collect()
    }

    /// Delete a notification
    pub fn dismiss(&mut self, id: &EntityId) -> TabsyncResult<()> {
        self.inner
            .apply_local(MutationOp::Delete, Some(id.clone()), Value::Null)?;
        Ok(())
    }

    pub fn store(&self) -> &EntityStore<Notification> {
        &self.inner
    }

    /// Mutable access for queue delivery, acks and snapshots
    ///
    /// Remote changes should go through [`NotificationCenter::apply_remote`]
    /// so presentation happens.
    pub fn store_mut(&mut self) -> &mut EntityStore<Notification> {
        &mut self.inner
    }
}

impl Deref for NotificationCenter {
    type Target = EntityStore<Notification>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_broadcast::{BroadcastBus, BroadcastConfig};
    use tabsync_core::{SharedMedium, SystemClock, TabId};
    use tabsync_storage::{MemoryMedium, QueueConfig};

    fn center() -> (NotificationCenter, Arc<RecordingPresenter>) {
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let tab_id = TabId::new("a");
        let presenter = Arc::new(RecordingPresenter::new());
        let center = NotificationCenter::open(
            &StoreContext {
                bus: Arc::new(BroadcastBus::new(
                    medium.clone(),
                    tab_id.clone(),
                    &BroadcastConfig::default(),
                )),
                tab_id,
                medium,
                clock: Arc::new(SystemClock),
                namespace: "tabsync".into(),
                queue: QueueConfig::default(),
            },
            presenter.clone(),
        );
        (center, presenter)
    }

    fn pushed(id: &str, category: &str) -> Notification {
        Notification {
            id: EntityId::new(id),
            title: format!("title {}", id),
            message: String::new(),
            severity: Severity::Info,
            read: false,
            category: category.into(),
            created_at: None,
        }
    }

    #[test]
    fn test_presented_once_per_id() {
        let (mut center, presenter) = center();
        let n = pushed("n-1", "orders");

        assert_eq!(center.receive(&n).unwrap(), Applied::Inserted);
        assert_eq!(center.receive(&n).unwrap(), Applied::Ignored);
        assert_eq!(presenter.count(), 1);
    }

    #[test]
    fn test_broadcast_and_local_not_presented() {
        let (mut center, presenter) = center();
        let payload = serde_json::to_value(pushed("n-2", "x")).unwrap();
        center
            .apply_remote(
                MutationOp::Create,
                &EntityId::new("n-2"),
                &payload,
                ChangeSource::Broadcast,
            )
            .unwrap();
        center
            .notify("Saved", "Draft saved", Severity::Success, "drafts")
            .unwrap();

        assert_eq!(center.len(), 2);
        assert_eq!(presenter.count(), 0);
    }

    #[test]
    fn test_read_bookkeeping() {
        let (mut center, _) = center();
        center.receive(&pushed("n-1", "orders")).unwrap();
        center.receive(&pushed("n-2", "orders")).unwrap();
        center.receive(&pushed("n-3", "system")).unwrap();
        assert_eq!(center.unread_count(), 3);
        assert_eq!(center.by_category("orders").len(), 2);

        assert!(center.mark_read(&EntityId::new("n-1")).unwrap());
        assert!(!center.mark_read(&EntityId::new("n-1")).unwrap());
        assert_eq!(center.unread_count(), 2);

        assert_eq!(center.mark_all_read().unwrap(), 2);
        assert_eq!(center.unread_count(), 0);
        assert_eq!(center.pending_count(), 3);

        center.dismiss(&EntityId::new("n-3")).unwrap();
        assert!(center.by_category("system").is_empty());
    }
}
