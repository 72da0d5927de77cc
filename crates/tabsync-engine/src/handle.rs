//! Command handle for the engine task

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use tabsync_core::{
    EntityId, Notification, Order, OrderStatus, SyncStatus, TabId, TabsyncError, TabsyncResult,
};
use tabsync_store::{IssueId, NewOrder, SyncIssue};

type Reply<T> = oneshot::Sender<T>;

/// Requests handled inside the engine loop
#[derive(Debug)]
pub(crate) enum Command {
    AddOrder(NewOrder, Reply<TabsyncResult<EntityId>>),
    UpdateOrderStatus(EntityId, OrderStatus, Reply<TabsyncResult<()>>),
    UpdateOrder(EntityId, Value, Reply<TabsyncResult<()>>),
    DeleteOrder(EntityId, Reply<TabsyncResult<()>>),
    MarkRead(EntityId, Reply<TabsyncResult<bool>>),
    MarkAllRead(Reply<TabsyncResult<usize>>),
    DismissNotification(EntityId, Reply<TabsyncResult<()>>),
    DismissIssue(IssueId, Reply<bool>),
    Visibility(bool),
    NetworkOnline,
    NetworkOffline,
    Resync,
    State(Reply<SyncState>),
    Shutdown(Reply<()>),
}

/// Point-in-time view of one tab
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub orders: Vec<Order>,
    pub notifications: Vec<Notification>,
    pub order_status: SyncStatus,
    pub notification_status: SyncStatus,
    pub pending_orders: usize,
    pub pending_notifications: usize,
    pub unread: usize,
    pub issues: Vec<SyncIssue>,
}

impl SyncState {
    pub fn order(&self, id: &EntityId) -> Option<&Order> {
        self.orders.iter().find(|o| &o.id == id)
    }

    /// Combined status, worst first
    pub fn status(&self) -> SyncStatus {
        worst(self.order_status, self.notification_status)
    }
}

fn worst(a: SyncStatus, b: SyncStatus) -> SyncStatus {
    let rank = |s: SyncStatus| match s {
        SyncStatus::Error => 3,
        SyncStatus::Pending => 2,
        SyncStatus::Offline => 1,
        SyncStatus::Synced => 0,
    };
    if rank(a) >= rank(b) { a } else { b }
}

/// Cloneable handle to a running [`SyncEngine`](crate::SyncEngine)
///
/// Local mutations apply optimistically inside the engine task; the returned
/// futures resolve as soon as the change is visible and queued, never waiting
/// on the network.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tab_id: TabId,
    commands: mpsc::Sender<Command>,
    order_status: watch::Receiver<SyncStatus>,
    notification_status: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    pub(crate) fn new(
        tab_id: TabId,
        commands: mpsc::Sender<Command>,
        order_status: watch::Receiver<SyncStatus>,
        notification_status: watch::Receiver<SyncStatus>,
    ) -> Self {
        Self {
            tab_id,
            commands,
            order_status,
            notification_status,
        }
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> TabsyncResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| TabsyncError::EngineStopped)?;
        rx.await.map_err(|_| TabsyncError::EngineStopped)
    }

    async fn signal(&self, command: Command) -> TabsyncResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TabsyncError::EngineStopped)
    }

    /// Create an order; returns its temporary id
    pub async fn add_order(&self, order: NewOrder) -> TabsyncResult<EntityId> {
        self.request(|tx| Command::AddOrder(order, tx)).await?
    }

    pub async fn update_order_status(&self, id: EntityId, status: OrderStatus) -> TabsyncResult<()> {
        self.request(|tx| Command::UpdateOrderStatus(id, status, tx))
            .await?
    }

    /// Shallow-patch an order
    pub async fn update_order(&self, id: EntityId, patch: Value) -> TabsyncResult<()> {
        self.request(|tx| Command::UpdateOrder(id, patch, tx)).await?
    }

    pub async fn delete_order(&self, id: EntityId) -> TabsyncResult<()> {
        self.request(|tx| Command::DeleteOrder(id, tx)).await?
    }

    pub async fn mark_read(&self, id: EntityId) -> TabsyncResult<bool> {
        self.request(|tx| Command::MarkRead(id, tx)).await?
    }

    pub async fn mark_all_read(&self) -> TabsyncResult<usize> {
        self.request(Command::MarkAllRead).await?
    }

    pub async fn dismiss_notification(&self, id: EntityId) -> TabsyncResult<()> {
        self.request(|tx| Command::DismissNotification(id, tx))
            .await?
    }

    /// Dismiss a surfaced sync issue
    pub async fn dismiss_issue(&self, issue_id: IssueId) -> TabsyncResult<bool> {
        self.request(|tx| Command::DismissIssue(issue_id, tx)).await
    }

    /// The page became visible or hidden
    pub async fn set_visible(&self, visible: bool) -> TabsyncResult<()> {
        self.signal(Command::Visibility(visible)).await
    }

    pub async fn network_online(&self) -> TabsyncResult<()> {
        self.signal(Command::NetworkOnline).await
    }

    pub async fn network_offline(&self) -> TabsyncResult<()> {
        self.signal(Command::NetworkOffline).await
    }

    /// Refetch snapshots now
    pub async fn resync(&self) -> TabsyncResult<()> {
        self.signal(Command::Resync).await
    }

    pub async fn state(&self) -> TabsyncResult<SyncState> {
        self.request(Command::State).await
    }

    pub fn order_status(&self) -> watch::Receiver<SyncStatus> {
        self.order_status.clone()
    }

    pub fn notification_status(&self) -> watch::Receiver<SyncStatus> {
        self.notification_status.clone()
    }

    /// Stop the engine and wait for it to tear down its channels
    pub async fn shutdown(&self) -> TabsyncResult<()> {
        self.request(Command::Shutdown).await
    }
}
