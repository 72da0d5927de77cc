//! Per-topic delivery state
//!
//! Each topic has its own channel and delivers its own store's queue one
//! mutation at a time: the head is sent, and nothing else goes out until it
//! is acked, rejected, or times out.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use tabsync_core::{Entity, EntityKind};
use tabsync_store::EntityStore;
use tabsync_transport::{BackoffPolicy, ClientFrame, ConnectionManager};

/// Logical channel topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Orders,
    Notifications,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Orders, Topic::Notifications];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Orders => "orders",
            Topic::Notifications => "notifications",
        }
    }

    /// Topic whose channel carries mutations of `kind`
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Order => Topic::Orders,
            EntityKind::Notification => Topic::Notifications,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct Lane {
    pub topic: Topic,
    pub conn: ConnectionManager,
    pub url: String,
    /// Set while the head mutation is in flight
    pub ack_deadline: Option<Instant>,
    /// Set while a failed head waits to be resent
    pub retry_at: Option<Instant>,
    /// Channel changes applied so far; a snapshot fetched before the latest
    /// one may be missing it
    pub changes: u64,
    /// `changes` at the start of the outstanding snapshot fetch
    pub fetching: Option<u64>,
}

impl Lane {
    pub fn new(topic: Topic, conn: ConnectionManager, url: String) -> Self {
        Self {
            topic,
            conn,
            url,
            ack_deadline: None,
            retry_at: None,
            changes: 0,
            fetching: None,
        }
    }

    /// The next delivery timer, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.ack_deadline.or(self.retry_at)
    }

    /// Forget delivery timers; the channel is gone
    pub fn clear_timers(&mut self) {
        self.ack_deadline = None;
        self.retry_at = None;
    }

    /// Send the queue head if the channel is up and nothing is in flight
    pub fn pump<T: Entity>(&mut self, store: &mut EntityStore<T>, ack_timeout: Duration) {
        if !self.conn.is_connected() || self.retry_at.is_some() || store.in_flight().is_some() {
            return;
        }
        let Some(mutation) = store.next_to_send() else {
            return;
        };
        if self.conn.send(&ClientFrame::from(&mutation)) {
            self.ack_deadline = Some(Instant::now() + ack_timeout);
            debug!(
                topic = %self.topic,
                mutation_id = %mutation.mutation_id,
                op = %mutation.op,
                entity_id = %mutation.entity_id,
                "Sent mutation"
            );
        } else {
            store.reset_in_flight();
        }
    }

    /// The in-flight head was answered
    pub fn settled<T: Entity>(&mut self, store: &mut EntityStore<T>, ack_timeout: Duration) {
        if store.in_flight().is_none() {
            self.ack_deadline = None;
        }
        self.changes += 1;
        self.pump(store, ack_timeout);
    }

    /// Handle an expired delivery timer
    pub fn on_deadline<T: Entity>(
        &mut self,
        store: &mut EntityStore<T>,
        retry: &BackoffPolicy,
        ack_timeout: Duration,
    ) {
        let now = Instant::now();
        if self.ack_deadline.is_some_and(|at| at <= now) {
            self.ack_deadline = None;
            if let Some(attempts) = store.fail_in_flight() {
                let delay = retry.delay(attempts.saturating_sub(1));
                warn!(topic = %self.topic, attempts, ?delay, "No ack in time, retrying later");
                self.retry_at = Some(now + delay);
            }
        } else if self.retry_at.is_some_and(|at| at <= now) {
            self.retry_at = None;
            store.retry_failed();
            self.pump(store, ack_timeout);
        }
    }
}
