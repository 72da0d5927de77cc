//! End-to-end behaviour of the engine against mock servers

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

use tabsync_core::{
    EntityId, MockConnector, MockServer, Order, OrderStatus, SharedMedium, SyncStatus, TabId,
    decode_entity,
};
use tabsync_engine::{SyncConfig, SyncEngine, SyncHandle, SyncState};
use tabsync_storage::MemoryMedium;
use tabsync_store::{MemorySnapshotSource, NewOrder, RecordingPresenter};

const WAIT: Duration = Duration::from_secs(120);

struct Tab {
    handle: SyncHandle,
    orders: MockServer,
    notifications: MockServer,
    presenter: Arc<RecordingPresenter>,
}

struct TabOptions {
    name: &'static str,
    medium: Option<Arc<dyn SharedMedium>>,
    config: SyncConfig,
    orders_online: bool,
    snapshot: Option<Arc<MemorySnapshotSource<Order>>>,
}

impl TabOptions {
    fn new(name: &'static str) -> Self {
        let config = SyncConfig {
            resync_interval_secs: 0,
            cache_namespace: format!("tabsync-{}", name),
            ..SyncConfig::default()
        };
        Self {
            name,
            medium: None,
            config,
            orders_online: true,
            snapshot: None,
        }
    }

    fn medium(mut self, medium: Arc<dyn SharedMedium>) -> Self {
        self.medium = Some(medium);
        self
    }

    fn offline(mut self) -> Self {
        self.orders_online = false;
        self
    }

    fn start(self) -> Tab {
        tabsync_logging::init_testing();

        let (order_connector, orders) = MockConnector::pair();
        let (notification_connector, notifications) = MockConnector::pair();
        orders.set_online(self.orders_online);
        notifications.set_online(self.orders_online);
        let presenter = Arc::new(RecordingPresenter::new());

        let mut builder = SyncEngine::builder(self.config)
            .tab_id(TabId::new(self.name))
            .connector(Arc::new(order_connector))
            .notification_connector(Arc::new(notification_connector))
            .presenter(presenter.clone());
        if let Some(medium) = self.medium {
            builder = builder.medium(medium);
        }
        if let Some(source) = self.snapshot {
            builder = builder.order_source(source);
        }
        let (engine, handle) = builder.build().unwrap();
        engine.spawn();

        Tab {
            handle,
            orders,
            notifications,
            presenter,
        }
    }
}

/// Next mutation frame the client sent, skipping auth
async fn next_mutation(server: &mut MockServer) -> Value {
    loop {
        let frame = timeout(WAIT, server.recv_frame())
            .await
            .expect("no frame in time")
            .expect("client side gone");
        let frame: Value = serde_json::from_str(&frame).unwrap();
        if frame["type"] == "mutation" {
            return frame;
        }
        assert_eq!(frame["type"], "auth");
    }
}

fn ack(mutation: &Value, server_id: Option<&str>) -> String {
    let mut frame = json!({"type": "ack", "mutationId": mutation["mutationId"]});
    if let Some(server_id) = server_id {
        frame["serverId"] = json!(server_id);
    }
    frame.to_string()
}

fn order_event(op: &str, id: &str, payload: Value) -> String {
    json!({
        "type": "entity_event",
        "entityType": "order",
        "op": op,
        "entityId": id,
        "payload": payload,
    })
    .to_string()
}

/// Push once the client has (re)connected
async fn push(server: &MockServer, frame: impl Into<String>) {
    let frame = frame.into();
    timeout(WAIT, async {
        while !server.push(frame.clone()) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client never connected");
}

async fn wait_for_state<F>(handle: &SyncHandle, mut done: F) -> SyncState
where
    F: FnMut(&SyncState) -> bool,
{
    timeout(WAIT, async {
        loop {
            let state = handle.state().await.unwrap();
            if done(&state) {
                return state;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("state never reached")
}

async fn wait_for_status(handle: &SyncHandle, status: SyncStatus) {
    let mut rx = handle.order_status();
    timeout(WAIT, rx.wait_for(|s| *s == status))
        .await
        .expect("status never reached")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_offline_create_is_delivered_after_reconnect() {
    let mut tab = TabOptions::new("a").offline().start();

    let temp_id = tab
        .handle
        .add_order(NewOrder::new("Ada").item("Tea", 2, 350))
        .await
        .unwrap();
    assert!(temp_id.is_temporary());

    let state = tab.handle.state().await.unwrap();
    assert_eq!(state.orders.len(), 1);
    assert_eq!(state.order(&temp_id).unwrap().total_amount, 700);
    assert_eq!(state.pending_orders, 1);
    assert_eq!(state.order_status, SyncStatus::Pending);

    tab.orders.set_online(true);
    tab.handle.network_online().await.unwrap();

    let mutation = next_mutation(&mut tab.orders).await;
    assert_eq!(mutation["op"], "create");
    assert_eq!(mutation["entityType"], "order");
    assert_eq!(mutation["entityId"], temp_id.as_str());

    push(&tab.orders, ack(&mutation, Some("o-99"))).await;
    wait_for_status(&tab.handle, SyncStatus::Synced).await;

    let state = tab.handle.state().await.unwrap();
    assert_eq!(state.orders.len(), 1);
    assert!(state.order(&temp_id).is_none());
    assert_eq!(state.order(&EntityId::new("o-99")).unwrap().customer_name, "Ada");
    assert_eq!(state.pending_orders, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_mutations_replay_in_order() {
    let mut tab = TabOptions::new("a").start();

    let temp_id = tab.handle.add_order(NewOrder::new("Ada")).await.unwrap();
    let create = next_mutation(&mut tab.orders).await;

    tab.handle
        .update_order(temp_id.clone(), json!({"totalAmount": 1}))
        .await
        .unwrap();
    tab.handle
        .update_order(temp_id.clone(), json!({"totalAmount": 2}))
        .await
        .unwrap();
    assert!(tab.orders.drain_frames().is_empty());

    push(&tab.orders, ack(&create, Some("o-99"))).await;

    let first = next_mutation(&mut tab.orders).await;
    assert_eq!(first["op"], "update");
    assert_eq!(first["entityId"], "o-99");
    assert_eq!(first["payload"]["totalAmount"], 1);
    push(&tab.orders, ack(&first, None)).await;

    let second = next_mutation(&mut tab.orders).await;
    assert_eq!(second["payload"]["totalAmount"], 2);
    push(&tab.orders, ack(&second, None)).await;

    wait_for_status(&tab.handle, SyncStatus::Synced).await;
    let state = tab.handle.state().await.unwrap();
    assert_eq!(state.order(&EntityId::new("o-99")).unwrap().total_amount, 2);
}

#[tokio::test(start_paused = true)]
async fn test_two_tabs_converge() {
    let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
    let mut a = TabOptions::new("a").medium(medium.clone()).start();
    let b = TabOptions::new("b").medium(medium).start();

    let temp_id = a.handle.add_order(NewOrder::new("Ada").total(500)).await.unwrap();
    let state = wait_for_state(&b.handle, |s| s.order(&temp_id).is_some()).await;
    assert_eq!(state.order(&temp_id).unwrap().total_amount, 500);
    assert_eq!(state.pending_orders, 0);

    let create = next_mutation(&mut a.orders).await;
    push(&a.orders, ack(&create, Some("o-99"))).await;
    let server_id = EntityId::new("o-99");
    wait_for_state(&b.handle, |s| s.order(&server_id).is_some() && s.order(&temp_id).is_none())
        .await;

    // The server fans the change out to every tab
    let update = order_event("update", "o-99", json!({"status": "ready"}));
    push(&a.orders, update.clone()).await;
    push(&b.orders, update).await;

    for handle in [&a.handle, &b.handle] {
        let state = wait_for_state(handle, |s| {
            s.order(&server_id)
                .is_some_and(|o| o.status == OrderStatus::Ready)
        })
        .await;
        assert_eq!(state.orders.len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_delete_is_idempotent() {
    let tab = TabOptions::new("a").start();

    push(&tab.orders, order_event("create", "5", json!({"customerName": "Bo"}))).await;
    let five = EntityId::from(5);
    wait_for_state(&tab.handle, |s| s.order(&five).is_some()).await;

    push(&tab.orders, order_event("delete", "5", Value::Null)).await;
    push(&tab.orders, order_event("delete", "5", Value::Null)).await;
    push(&tab.orders, order_event("create", "6", json!({"customerName": "Cy"}))).await;

    let state = wait_for_state(&tab.handle, |s| s.order(&EntityId::from(6)).is_some()).await;
    assert!(state.order(&five).is_none());
    assert_eq!(state.orders.len(), 1);
    assert!(state.issues.is_empty());
    assert_eq!(state.order_status, SyncStatus::Synced);
}

#[tokio::test(start_paused = true)]
async fn test_cached_state_survives_restart_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = TabOptions::new("a");
    options.config.storage_dir = Some(dir.path().to_path_buf());
    let config = options.config.clone();

    let tab = options.start();
    push(&tab.orders, order_event("create", "o-1", json!({"customerName": "Ada", "totalAmount": 42}))).await;
    wait_for_state(&tab.handle, |s| s.orders.len() == 1).await;
    tab.handle.shutdown().await.unwrap();

    let mut options = TabOptions::new("a").offline();
    options.config = config;
    let tab = options.start();

    let state = tab.handle.state().await.unwrap();
    let order = state.order(&EntityId::new("o-1")).unwrap();
    assert_eq!(order.total_amount, 42);
    assert_eq!(state.order_status, SyncStatus::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_reject_rolls_back_and_surfaces_issue() {
    let mut tab = TabOptions::new("a").start();
    let id = EntityId::new("o-1");

    push(&tab.orders, order_event("create", "o-1", json!({"customerName": "Ada", "totalAmount": 100}))).await;
    wait_for_state(&tab.handle, |s| s.order(&id).is_some()).await;

    tab.handle
        .update_order(id.clone(), json!({"totalAmount": 5}))
        .await
        .unwrap();
    assert_eq!(tab.handle.state().await.unwrap().order(&id).unwrap().total_amount, 5);

    let mutation = next_mutation(&mut tab.orders).await;
    let reject = json!({
        "type": "reject",
        "mutationId": mutation["mutationId"],
        "reason": "price locked",
    });
    push(&tab.orders, reject.to_string()).await;
    wait_for_status(&tab.handle, SyncStatus::Error).await;

    let state = tab.handle.state().await.unwrap();
    assert_eq!(state.order(&id).unwrap().total_amount, 100);
    assert_eq!(state.pending_orders, 0);
    assert_eq!(state.issues.len(), 1);
    assert_eq!(state.issues[0].reason, "price locked");

    assert!(tab.handle.dismiss_issue(state.issues[0].id).await.unwrap());
    wait_for_status(&tab.handle, SyncStatus::Synced).await;
}

fn reject(mutation: &Value, reason: &str) -> String {
    json!({"type": "reject", "mutationId": mutation["mutationId"], "reason": reason}).to_string()
}

#[tokio::test(start_paused = true)]
async fn test_dismissing_one_issue_keeps_the_other_topic_issue() {
    let mut tab = TabOptions::new("a").start();
    let order_id = EntityId::new("o-1");
    let note_id = EntityId::new("n-1");

    push(&tab.orders, order_event("create", "o-1", json!({"customerName": "Ada"}))).await;
    let note = json!({"type": "notification", "id": "n-1", "title": "Hi", "category": "orders"});
    push(&tab.notifications, note.to_string()).await;
    wait_for_state(&tab.handle, |s| s.order(&order_id).is_some() && s.notifications.len() == 1)
        .await;

    tab.handle
        .update_order_status(order_id.clone(), OrderStatus::Ready)
        .await
        .unwrap();
    let order_mutation = next_mutation(&mut tab.orders).await;
    push(&tab.orders, reject(&order_mutation, "order locked")).await;

    tab.handle.mark_read(note_id).await.unwrap();
    let note_mutation = next_mutation(&mut tab.notifications).await;
    push(&tab.notifications, reject(&note_mutation, "note locked")).await;

    let state = wait_for_state(&tab.handle, |s| s.issues.len() == 2).await;
    let note_issue = state
        .issues
        .iter()
        .find(|i| i.reason == "note locked")
        .unwrap();
    assert_ne!(state.issues[0].id, state.issues[1].id);

    assert!(tab.handle.dismiss_issue(note_issue.id).await.unwrap());
    let left: Vec<String> = tab
        .handle
        .state()
        .await
        .unwrap()
        .issues
        .into_iter()
        .map(|i| i.reason)
        .collect();
    assert_eq!(left, vec!["order locked".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_ack_resends_same_mutation() {
    let mut tab = TabOptions::new("a").start();

    tab.handle.add_order(NewOrder::new("Ada")).await.unwrap();
    let first = next_mutation(&mut tab.orders).await;
    let again = next_mutation(&mut tab.orders).await;
    assert_eq!(first["mutationId"], again["mutationId"]);

    push(&tab.orders, ack(&again, Some("o-7"))).await;
    wait_for_status(&tab.handle, SyncStatus::Synced).await;
    assert_eq!(tab.handle.state().await.unwrap().orders.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_mutation_resent_after_reconnect() {
    let mut tab = TabOptions::new("a").start();

    tab.handle.add_order(NewOrder::new("Ada")).await.unwrap();
    let first = next_mutation(&mut tab.orders).await;
    tab.orders.disconnect();

    let again = next_mutation(&mut tab.orders).await;
    assert_eq!(first["mutationId"], again["mutationId"]);
    assert!(tab.orders.connect_count() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_keeps_connection() {
    let tab = TabOptions::new("a").start();

    push(&tab.orders, "not json").await;
    push(&tab.orders, r#"{"type":"mystery"}"#).await;
    push(&tab.orders, order_event("create", "o-1", json!({"customerName": "Ada"}))).await;

    wait_for_state(&tab.handle, |s| s.orders.len() == 1).await;
    assert_eq!(tab.orders.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_fetched_on_connect() {
    let orders = ["o-1", "o-2"]
        .into_iter()
        .map(|id| decode_entity::<Order>(&json!({"id": id, "customerName": "Ada"})).unwrap())
        .collect();
    let source = Arc::new(MemorySnapshotSource::new(orders));
    let mut options = TabOptions::new("a");
    options.snapshot = Some(source.clone());
    let tab = options.start();

    let state = wait_for_state(&tab.handle, |s| s.orders.len() == 2).await;
    assert!(state.order(&EntityId::new("o-2")).is_some());
    assert_eq!(source.fetch_count(), 1);

    tab.handle.resync().await.unwrap();
    timeout(WAIT, async {
        while source.fetch_count() < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_lost_broadcasts_trigger_snapshot_refetch() {
    let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
    let order = json!({"id": "o-1", "customerName": "Ada"});
    let source = Arc::new(MemorySnapshotSource::new(vec![
        decode_entity::<Order>(&order).unwrap(),
    ]));
    let mut options = TabOptions::new("a").medium(medium.clone());
    options.snapshot = Some(source.clone());
    let tab = options.start();
    wait_for_state(&tab.handle, |s| s.orders.len() == 1).await;
    assert_eq!(source.fetch_count(), 1);

    // Outrun the tab's view of the medium without yielding to it
    for i in 0..4_000 {
        medium.set("tabsync-other:cache:order", &i.to_string()).unwrap();
    }

    timeout(WAIT, async {
        while source.fetch_count() < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no refetch after lag");
}

#[tokio::test(start_paused = true)]
async fn test_pushed_notification_presented_once() {
    let tab = TabOptions::new("a").start();
    let notification = json!({
        "type": "notification",
        "id": "n-1",
        "title": "Order ready",
        "category": "orders",
    })
    .to_string();

    push(&tab.notifications, notification.clone()).await;
    push(&tab.notifications, notification).await;
    let state = wait_for_state(&tab.handle, |s| s.notifications.len() == 1).await;
    assert_eq!(state.unread, 1);
    assert_eq!(tab.presenter.count(), 1);

    assert!(tab.handle.mark_read(EntityId::new("n-1")).await.unwrap());
    assert_eq!(tab.handle.state().await.unwrap().unread, 0);
}

#[tokio::test(start_paused = true)]
async fn test_handle_fails_after_shutdown() {
    let tab = TabOptions::new("a").start();
    tab.handle.shutdown().await.unwrap();

    sleep(Duration::from_millis(10)).await;
    assert!(tab.handle.add_order(NewOrder::new("Ada")).await.is_err());
}
