//! The sync engine event loop
//!
//! One task owns every store, channel and timer of a tab. All state changes
//! happen synchronously inside `select!` arms, so there are no locks and local
//! optimistic application always completes before the network sees anything.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tracing::{Instrument, debug, info, instrument, warn};

use tabsync_broadcast::{BroadcastBus, BusEvent, BusSubscriber};
use tabsync_core::{
    BroadcastMessage, Clock, Connector, EntityId, EntityKind, MutationId, Notification, Order,
    SharedMedium, SystemClock, TabId, TabsyncResult,
};
use tabsync_logging::tab_span;
use tabsync_storage::{FileMedium, MemoryMedium};
use tabsync_store::{
    ChangeSource, NotificationCenter, OrderStore, Presenter, SnapshotSource,
    StoreContext, TracingPresenter,
};
use tabsync_transport::{
    BackoffPolicy, ClientFrame, ConnectionEvent, ConnectionManager, ServerFrame, WsConnector,
    decode_server_frame,
};

use crate::config::SyncConfig;
use crate::handle::{Command, SyncHandle, SyncState};
use crate::lane::{Lane, Topic};

/// Queue expiry is checked this often
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

const COMMAND_CAPACITY: usize = 256;

/// Outcome of a snapshot fetch, tagged with the lane's change count at start
enum Fetched {
    Orders(u64, TabsyncResult<Vec<Order>>),
    Notifications(u64, TabsyncResult<Vec<Notification>>),
}

/// Assembles a [`SyncEngine`]
///
/// Everything but the config has a production default: a random tab id, a
/// file or in-memory medium depending on `storage_dir`, WebSocket channels,
/// and a logging presenter. Without snapshot sources the engine never resyncs.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    tab_id: Option<TabId>,
    medium: Option<Arc<dyn SharedMedium>>,
    connector: Option<Arc<dyn Connector>>,
    notification_connector: Option<Arc<dyn Connector>>,
    order_source: Option<Arc<dyn SnapshotSource<Order>>>,
    notification_source: Option<Arc<dyn SnapshotSource<Notification>>>,
    presenter: Option<Arc<dyn Presenter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SyncEngineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            tab_id: None,
            medium: None,
            connector: None,
            notification_connector: None,
            order_source: None,
            notification_source: None,
            presenter: None,
            clock: None,
        }
    }

    pub fn tab_id(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Shared medium for cache, queue and broadcast
    pub fn medium(mut self, medium: Arc<dyn SharedMedium>) -> Self {
        self.medium = Some(medium);
        self
    }

    /// Connector for every topic
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Separate connector for the notifications topic
    pub fn notification_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.notification_connector = Some(connector);
        self
    }

    pub fn order_source(mut self, source: Arc<dyn SnapshotSource<Order>>) -> Self {
        self.order_source = Some(source);
        self
    }

    pub fn notification_source(mut self, source: Arc<dyn SnapshotSource<Notification>>) -> Self {
        self.notification_source = Some(source);
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the config, hydrate the stores and wire everything up
    pub fn build(self) -> TabsyncResult<(SyncEngine, SyncHandle)> {
        let config = self.config;
        config.validate()?;

        let tab_id = self.tab_id.unwrap_or_else(TabId::generate);
        let medium: Arc<dyn SharedMedium> = match (self.medium, &config.storage_dir) {
            (Some(medium), _) => medium,
            (None, Some(dir)) => Arc::new(FileMedium::open(dir)?),
            (None, None) => Arc::new(MemoryMedium::new()),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let bus = Arc::new(
            BroadcastBus::new(medium.clone(), tab_id.clone(), &config.broadcast)
                .with_clock(clock.clone()),
        );
        let subscriber = bus.subscribe();

        let ctx = StoreContext {
            tab_id: tab_id.clone(),
            medium,
            bus,
            clock,
            namespace: config.cache_namespace.clone(),
            queue: config.queue.clone(),
        };
        let orders = OrderStore::open(&ctx);
        let notifications = NotificationCenter::open(
            &ctx,
            self.presenter.unwrap_or_else(|| Arc::new(TracingPresenter)),
        );

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new()));
        let notification_connector = self.notification_connector.unwrap_or_else(|| connector.clone());
        let policy = BackoffPolicy::from(&config.backoff);
        let lane = |topic: Topic, connector: Arc<dyn Connector>| {
            Lane::new(
                topic,
                ConnectionManager::new(topic.as_str(), connector, policy),
                config.channel_url(topic),
            )
        };
        let order_lane = lane(Topic::Orders, connector);
        let notification_lane = lane(Topic::Notifications, notification_connector);

        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (fetched_tx, fetched) = mpsc::unbounded_channel();
        let handle = SyncHandle::new(
            tab_id.clone(),
            command_tx,
            orders.subscribe_status(),
            notifications.subscribe_status(),
        );

        info!(
            tab = %tab_id.short_id(),
            orders = orders.len(),
            notifications = notifications.len(),
            "Sync engine built"
        );

        let engine = SyncEngine {
            tab_id,
            retry: policy,
            ack_timeout: config.queue.ack_timeout(),
            config,
            orders,
            notifications,
            order_lane,
            notification_lane,
            subscriber,
            commands,
            order_source: self.order_source,
            notification_source: self.notification_source,
            fetched_tx,
            fetched,
            resync: None,
        };
        Ok((engine, handle))
    }
}

/// A tab's sync engine
pub struct SyncEngine {
    tab_id: TabId,
    config: SyncConfig,
    retry: BackoffPolicy,
    ack_timeout: Duration,
    orders: OrderStore,
    notifications: NotificationCenter,
    order_lane: Lane,
    notification_lane: Lane,
    subscriber: BusSubscriber,
    commands: mpsc::Receiver<Command>,
    order_source: Option<Arc<dyn SnapshotSource<Order>>>,
    notification_source: Option<Arc<dyn SnapshotSource<Notification>>>,
    fetched_tx: mpsc::UnboundedSender<Fetched>,
    fetched: mpsc::UnboundedReceiver<Fetched>,
    /// Periodic resync; only armed while a channel is up
    resync: Option<Interval>,
}

impl SyncEngine {
    pub fn builder(config: SyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    /// Run on a new task inside the tab's span
    pub fn spawn(self) -> JoinHandle<()> {
        let span = tab_span(&self.tab_id);
        tokio::spawn(self.run().instrument(span))
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!(tab = %self.tab_id.short_id(), "Sync engine started");
        for lane in [&mut self.order_lane, &mut self.notification_lane] {
            if let Err(e) = lane.conn.connect(&lane.url) {
                warn!(topic = %lane.topic, error = %e, "Cannot connect");
            }
        }
        let mut housekeeping = interval_at(
            Instant::now() + HOUSEKEEPING_INTERVAL,
            HOUSEKEEPING_INTERVAL,
        );
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let order_deadline = self.order_lane.deadline();
            let notification_deadline = self.notification_lane.deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        info!("All handles dropped");
                        self.teardown();
                        break;
                    };
                    if let Some(reply) = self.on_command(command) {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                }
                event = self.order_lane.conn.next_event() => {
                    self.on_connection_event(Topic::Orders, event);
                }
                event = self.notification_lane.conn.next_event() => {
                    self.on_connection_event(Topic::Notifications, event);
                }
                Some(event) = self.subscriber.recv() => match event {
                    BusEvent::Message(message) => self.on_broadcast(&message),
                    BusEvent::Lagged(missed) => {
                        info!(missed, "Sibling broadcasts lost, refetching snapshots");
                        self.resync_connected();
                    }
                },
                Some(fetched) = self.fetched.recv() => {
                    self.on_snapshot(fetched);
                }
                _ = sleep_until_some(order_deadline) => {
                    self.order_lane.on_deadline(&mut self.orders, &self.retry, self.ack_timeout);
                }
                _ = sleep_until_some(notification_deadline) => {
                    self.notification_lane.on_deadline(
                        self.notifications.store_mut(),
                        &self.retry,
                        self.ack_timeout,
                    );
                }
                _ = tick_some(self.resync.as_mut()) => {
                    debug!("Periodic resync");
                    self.resync_connected();
                }
                _ = housekeeping.tick() => {
                    self.expire_stale();
                }
            }
        }
        info!(tab = %self.tab_id.short_id(), "Sync engine stopped");
    }

    fn teardown(&mut self) {
        self.order_lane.conn.shutdown();
        self.notification_lane.conn.shutdown();
        self.order_lane.clear_timers();
        self.notification_lane.clear_timers();
        self.resync = None;
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Returns the reply channel when the command is a shutdown
    fn on_command(&mut self, command: Command) -> Option<oneshot::Sender<()>> {
        match command {
            Command::AddOrder(order, reply) => {
                let result = self.orders.add_order(order);
                self.order_lane.pump(&mut self.orders, self.ack_timeout);
                let _ = reply.send(result);
            }
            Command::UpdateOrderStatus(id, status, reply) => {
                let result = self.orders.update_status(&id, status);
                self.order_lane.pump(&mut self.orders, self.ack_timeout);
                let _ = reply.send(result);
            }
            Command::UpdateOrder(id, patch, reply) => {
                let result = self.orders.update_order(&id, patch);
                self.order_lane.pump(&mut self.orders, self.ack_timeout);
                let _ = reply.send(result);
            }
            Command::DeleteOrder(id, reply) => {
                let result = self.orders.delete_order(&id);
                self.order_lane.pump(&mut self.orders, self.ack_timeout);
                let _ = reply.send(result);
            }
            Command::MarkRead(id, reply) => {
                let result = self.notifications.mark_read(&id);
                self.pump_notifications();
                let _ = reply.send(result);
            }
            Command::MarkAllRead(reply) => {
                let result = self.notifications.mark_all_read();
                self.pump_notifications();
                let _ = reply.send(result);
            }
            Command::DismissNotification(id, reply) => {
                let result = self.notifications.dismiss(&id);
                self.pump_notifications();
                let _ = reply.send(result);
            }
            Command::DismissIssue(issue_id, reply) => {
                let dismissed = match issue_id.kind {
                    EntityKind::Order => self.orders.dismiss_issue(issue_id),
                    EntityKind::Notification => {
                        self.notifications.store_mut().dismiss_issue(issue_id)
                    }
                };
                let _ = reply.send(dismissed);
            }
            Command::Visibility(visible) => {
                for lane in [&mut self.order_lane, &mut self.notification_lane] {
                    lane.conn.on_visibility(visible);
                }
            }
            Command::NetworkOnline => {
                info!("Network online");
                for lane in [&mut self.order_lane, &mut self.notification_lane] {
                    lane.conn.on_network_online();
                }
            }
            Command::NetworkOffline => {
                info!("Network offline");
                for lane in [&mut self.order_lane, &mut self.notification_lane] {
                    lane.conn.on_network_offline();
                }
            }
            Command::Resync => self.resync_connected(),
            Command::State(reply) => {
                let _ = reply.send(self.state());
            }
            Command::Shutdown(reply) => return Some(reply),
        }
        None
    }

    fn pump_notifications(&mut self) {
        self.notification_lane
            .pump(self.notifications.store_mut(), self.ack_timeout);
    }

    fn state(&self) -> SyncState {
        let mut issues = self.orders.issues().to_vec();
        issues.extend_from_slice(self.notifications.issues());
        SyncState {
            orders: self.orders.list(),
            notifications: self.notifications.list(),
            order_status: self.orders.status(),
            notification_status: self.notifications.status(),
            pending_orders: self.orders.pending_count(),
            pending_notifications: self.notifications.pending_count(),
            unread: self.notifications.unread_count(),
            issues,
        }
    }

    // ========================================================================
    // Channels
    // ========================================================================

    #[instrument(skip(self, event))]
    fn on_connection_event(&mut self, topic: Topic, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                let auth = ClientFrame::auth(&self.config.user_id, &self.config.role);
                let lane = self.lane_mut(topic);
                lane.conn.send(&auth);
                lane.clear_timers();
                match topic {
                    Topic::Orders => {
                        self.orders.set_online(true);
                        self.orders.retry_failed();
                        self.order_lane.pump(&mut self.orders, self.ack_timeout);
                    }
                    Topic::Notifications => {
                        let store = self.notifications.store_mut();
                        store.set_online(true);
                        store.retry_failed();
                        self.pump_notifications();
                    }
                }
                self.arm_resync();
                self.fetch_snapshot(topic);
            }
            ConnectionEvent::Frame(text) => self.on_frame(topic, &text),
            ConnectionEvent::Closed(reason) => {
                info!(error = %reason, "Channel closed");
                self.lane_mut(topic).clear_timers();
                match topic {
                    Topic::Orders => {
                        self.orders.reset_in_flight();
                        self.orders.set_online(false);
                    }
                    Topic::Notifications => {
                        let store = self.notifications.store_mut();
                        store.reset_in_flight();
                        store.set_online(false);
                    }
                }
                if !self.order_lane.conn.is_connected()
                    && !self.notification_lane.conn.is_connected()
                {
                    self.resync = None;
                }
            }
        }
    }

    fn lane_mut(&mut self, topic: Topic) -> &mut Lane {
        match topic {
            Topic::Orders => &mut self.order_lane,
            Topic::Notifications => &mut self.notification_lane,
        }
    }

    /// Decode and route one server frame
    ///
    /// Malformed frames are dropped; the connection stays up.
    fn on_frame(&mut self, topic: Topic, text: &str) {
        let frame = match decode_server_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%topic, error = %e, "Dropping malformed frame");
                return;
            }
        };

        let target = frame.target_id();
        match frame {
            ServerFrame::EntityEvent {
                entity_type,
                op,
                payload,
                server_id,
                mutation_id,
                ..
            } => {
                let Some(target) = target else {
                    warn!(%topic, %entity_type, %op, "Dropping entity event without an id");
                    return;
                };
                if let Some(mutation_id) = mutation_id {
                    self.on_ack(entity_type, &mutation_id, server_id.as_ref());
                }
                let result = match entity_type {
                    EntityKind::Order => {
                        self.orders
                            .apply_remote(op, &target, &payload, ChangeSource::Channel)
                    }
                    EntityKind::Notification => {
                        self.notifications
                            .apply_remote(op, &target, &payload, ChangeSource::Channel)
                    }
                };
                match result {
                    Ok(_) => self.lane_mut(Topic::for_kind(entity_type)).changes += 1,
                    Err(e) => {
                        warn!(%topic, error = %e, entity_id = %target, "Dropping invalid entity event")
                    }
                }
            }
            ServerFrame::Ack {
                mutation_id,
                server_id,
            } => {
                let kind = self.owner_of(&mutation_id);
                match kind {
                    Some(kind) => self.on_ack(kind, &mutation_id, server_id.as_ref()),
                    None => debug!(%mutation_id, "Ack for unknown mutation"),
                }
            }
            ServerFrame::Notification(notification) => {
                match self.notifications.receive(&notification) {
                    Ok(_) => self.notification_lane.changes += 1,
                    Err(e) => warn!(error = %e, "Dropping invalid notification"),
                }
            }
            ServerFrame::Reject {
                mutation_id,
                reason,
            } => {
                let rejection = match self.owner_of(&mutation_id) {
                    Some(EntityKind::Order) => {
                        let rejection = self.orders.handle_reject(&mutation_id, &reason);
                        self.order_lane.settled(&mut self.orders, self.ack_timeout);
                        rejection
                    }
                    Some(EntityKind::Notification) => {
                        let rejection = self
                            .notifications
                            .store_mut()
                            .handle_reject(&mutation_id, &reason);
                        self.notification_lane
                            .settled(self.notifications.store_mut(), self.ack_timeout);
                        rejection
                    }
                    None => None,
                };
                match rejection {
                    Some(rejection) => warn!(%rejection, "Server rejected mutation"),
                    None => debug!(%mutation_id, "Reject for unknown mutation"),
                }
            }
        }
    }

    fn owner_of(&self, mutation_id: &MutationId) -> Option<EntityKind> {
        if self.orders.owns_mutation(mutation_id) {
            Some(EntityKind::Order)
        } else if self.notifications.owns_mutation(mutation_id) {
            Some(EntityKind::Notification)
        } else {
            None
        }
    }

    fn on_ack(&mut self, kind: EntityKind, mutation_id: &MutationId, server_id: Option<&EntityId>) {
        match kind {
            EntityKind::Order => {
                if self.orders.handle_ack(mutation_id, server_id).is_some() {
                    self.order_lane.settled(&mut self.orders, self.ack_timeout);
                }
            }
            EntityKind::Notification => {
                let store = self.notifications.store_mut();
                if store.handle_ack(mutation_id, server_id).is_some() {
                    self.notification_lane
                        .settled(self.notifications.store_mut(), self.ack_timeout);
                }
            }
        }
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    fn on_broadcast(&mut self, message: &BroadcastMessage) {
        if let Err(e) = self.orders.apply_broadcast(message) {
            warn!(error = %e, sender = %message.sender_id.short_id(), "Ignoring broadcast");
            return;
        }
        if let Err(e) = self.notifications.store_mut().apply_broadcast(message) {
            warn!(error = %e, sender = %message.sender_id.short_id(), "Ignoring broadcast");
        }
    }

    // ========================================================================
    // Snapshots and housekeeping
    // ========================================================================

    fn arm_resync(&mut self) {
        if self.resync.is_some() {
            return;
        }
        if let Some(period) = self.config.resync_interval() {
            let mut resync = interval_at(Instant::now() + period, period);
            resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.resync = Some(resync);
        }
    }

    fn resync_connected(&mut self) {
        for topic in Topic::ALL {
            if self.lane_mut(topic).conn.is_connected() {
                self.fetch_snapshot(topic);
            }
        }
    }

    /// Fetch a snapshot on a helper task; the result comes back through
    /// the loop
    fn fetch_snapshot(&mut self, topic: Topic) {
        let lane = self.lane_mut(topic);
        if lane.fetching.is_some() {
            return;
        }
        let started_at = lane.changes;
        let tx = self.fetched_tx.clone();

        match topic {
            Topic::Orders => {
                let Some(source) = self.order_source.clone() else {
                    return;
                };
                self.order_lane.fetching = Some(started_at);
                tokio::spawn(async move {
                    let result = source.fetch().await;
                    let _ = tx.send(Fetched::Orders(started_at, result));
                });
            }
            Topic::Notifications => {
                let Some(source) = self.notification_source.clone() else {
                    return;
                };
                self.notification_lane.fetching = Some(started_at);
                tokio::spawn(async move {
                    let result = source.fetch().await;
                    let _ = tx.send(Fetched::Notifications(started_at, result));
                });
            }
        }
        debug!(%topic, "Fetching snapshot");
    }

    fn on_snapshot(&mut self, fetched: Fetched) {
        match fetched {
            Fetched::Orders(started_at, result) => {
                self.order_lane.fetching = None;
                if let Some(snapshot) = usable(Topic::Orders, self.order_lane.changes, started_at, result) {
                    self.orders.replace_with_snapshot(snapshot);
                }
            }
            Fetched::Notifications(started_at, result) => {
                self.notification_lane.fetching = None;
                if let Some(snapshot) =
                    usable(Topic::Notifications, self.notification_lane.changes, started_at, result)
                {
                    self.notifications.store_mut().replace_with_snapshot(snapshot);
                }
            }
        }
    }

    fn expire_stale(&mut self) {
        let expired = self.orders.expire_stale().len()
            + self.notifications.store_mut().expire_stale().len();
        if expired > 0 {
            warn!(expired, "Expired queued mutations");
        }
    }
}

/// A fetched snapshot, unless it failed or predates a channel change
fn usable<T>(topic: Topic, changes: u64, started_at: u64, result: TabsyncResult<Vec<T>>) -> Option<Vec<T>> {
    match result {
        Err(e) => {
            warn!(%topic, error = %e, "Snapshot fetch failed");
            None
        }
        Ok(_) if changes != started_at => {
            debug!(%topic, "Discarding snapshot older than applied channel changes");
            None
        }
        Ok(snapshot) => Some(snapshot),
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick_some(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
