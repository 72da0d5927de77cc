//! Connection lifecycle
//!
//! [`ConnectionManager`] owns one duplex channel for one topic and drives it
//! through an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -(close)-> Backoff -> Connecting -> ...
//!                     |                                 ^
//!                     +---------(connect failed)--------+
//! any state -(shutdown)-> Teardown (terminal)
//! ```
//!
//! There is exactly one backoff timer handle. Forcing a reconnect (page became
//! visible, network came back) replaces it instead of adding a second one.
//!
//! The manager is driven by awaiting [`ConnectionManager::next_event`] in the
//! owner's event loop. That future is cancel-safe: an in-progress connect and
//! the backoff timer live in the manager, not in the future, so dropping it
//! from a `select!` loses nothing.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::{Sleep, sleep};
use tracing::{debug, info, instrument, warn};

use tabsync_core::{Channel, ConnectivityError, Connector};

use crate::backoff::BackoffPolicy;
use crate::protocol::ClientFrame;

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before reconnect attempt `attempt`
    Backoff { attempt: u32, delay: Duration },
    /// Shut down for good
    Teardown,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff { attempt, delay } => {
                write!(f, "backoff(attempt={}, delay={:?})", attempt, delay)
            }
            ConnectionState::Teardown => write!(f, "teardown"),
        }
    }
}

/// What the owner's event loop has to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The channel is up; authenticate and drain
    Opened,
    /// A text frame arrived
    Frame(String),
    /// An established channel went away
    Closed(ConnectivityError),
}

type PendingConnect = BoxFuture<'static, Result<Box<dyn Channel>, ConnectivityError>>;

/// Reconnecting owner of one server channel
pub struct ConnectionManager {
    topic: String,
    connector: Arc<dyn Connector>,
    policy: BackoffPolicy,
    url: Option<String>,
    state: ConnectionState,
    /// Consecutive failed attempts since the last successful connect
    attempt: u32,
    channel: Option<Box<dyn Channel>>,
    connecting: Option<PendingConnect>,
    timer: Option<Pin<Box<Sleep>>>,
    /// Close detected outside `next_event`, reported on its next call
    closed: Option<ConnectivityError>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("topic", &self.topic)
            .field("url", &self.url)
            .field("state", &self.state)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(topic: impl Into<String>, connector: Arc<dyn Connector>, policy: BackoffPolicy) -> Self {
        Self {
            topic: topic.into(),
            connector,
            policy,
            url: None,
            state: ConnectionState::Disconnected,
            attempt: 0,
            channel: None,
            connecting: None,
            timer: None,
            closed: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Failed attempts since the last successful connect
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Start connecting to `url`
    ///
    /// A no-op while already connected or connecting to the same url.
    #[instrument(skip(self), fields(topic = %self.topic))]
    pub fn connect(&mut self, url: &str) -> Result<(), ConnectivityError> {
        if self.state == ConnectionState::Teardown {
            return Err(ConnectivityError::TornDown);
        }
        let same_url = self.url.as_deref() == Some(url);
        if same_url
            && matches!(
                self.state,
                ConnectionState::Connected | ConnectionState::Connecting
            )
        {
            return Ok(());
        }

        self.url = Some(url.to_string());
        self.drop_channel();
        self.start_connecting();
        Ok(())
    }

    /// Send a frame if connected
    ///
    /// Fire-and-forget: returns `false` without buffering when there is no
    /// open channel or the write fails.
    pub fn send(&mut self, frame: &ClientFrame) -> bool {
        if !self.state.is_connected() {
            debug!(topic = %self.topic, state = %self.state, "Not connected, frame not sent");
            return false;
        }
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Failed to encode frame");
                return false;
            }
        };
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        match channel.send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Send failed, reconnecting");
                self.drop_channel();
                self.schedule_backoff();
                self.closed = Some(e);
                false
            }
        }
    }

    /// Page visibility changed
    pub fn on_visibility(&mut self, visible: bool) -> bool {
        if visible {
            self.force_reconnect("visible")
        } else {
            false
        }
    }

    /// The OS reported the network is back
    pub fn on_network_online(&mut self) -> bool {
        self.force_reconnect("network-online")
    }

    /// The OS reported the network is gone; stop trying until it returns
    #[instrument(skip(self), fields(topic = %self.topic))]
    pub fn on_network_offline(&mut self) {
        if self.state == ConnectionState::Teardown {
            return;
        }
        let was_connected = self.state.is_connected();
        self.drop_channel();
        self.connecting = None;
        self.timer = None;
        self.state = ConnectionState::Disconnected;
        if was_connected {
            self.closed = Some(ConnectivityError::Closed);
        }
        info!("Network offline, connection suspended");
    }

    /// Tear down for good
    #[instrument(skip(self), fields(topic = %self.topic))]
    pub fn shutdown(&mut self) {
        if self.state == ConnectionState::Teardown {
            return;
        }
        self.drop_channel();
        self.connecting = None;
        self.timer = None;
        self.closed = None;
        self.state = ConnectionState::Teardown;
        info!("Connection torn down");
    }

    /// Bypass backoff and reconnect now, unless connected or already connecting
    fn force_reconnect(&mut self, trigger: &'static str) -> bool {
        if self.url.is_none()
            || matches!(
                self.state,
                ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Teardown
            )
        {
            return false;
        }
        debug!(topic = %self.topic, trigger, state = %self.state, "Forcing reconnect");
        self.start_connecting();
        true
    }

    fn start_connecting(&mut self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        self.timer = None;
        self.state = ConnectionState::Connecting;

        let connector = self.connector.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    fn schedule_backoff(&mut self) {
        let delay = self.policy.delay(self.attempt);
        self.state = ConnectionState::Backoff {
            attempt: self.attempt,
            delay,
        };
        self.attempt = self.attempt.saturating_add(1);
        self.timer = Some(Box::pin(sleep(delay)));
        debug!(topic = %self.topic, attempt = self.attempt, ?delay, "Scheduled reconnect");
    }

    fn drop_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    /// Drive the state machine until something the owner must handle happens
    ///
    /// Never resolves while disconnected or torn down.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            if let Some(reason) = self.closed.take() {
                return ConnectionEvent::Closed(reason);
            }

            match self.state {
                ConnectionState::Connecting => {
                    let Some(connecting) = self.connecting.as_mut() else {
                        self.start_connecting();
                        continue;
                    };
                    let result = connecting.await;
                    self.connecting = None;
                    match result {
                        Ok(channel) => {
                            self.channel = Some(channel);
                            self.state = ConnectionState::Connected;
                            self.attempt = 0;
                            info!(topic = %self.topic, "Connected");
                            return ConnectionEvent::Opened;
                        }
                        Err(e) => {
                            warn!(topic = %self.topic, error = %e, attempt = self.attempt, "Connect failed");
                            self.schedule_backoff();
                        }
                    }
                }
                ConnectionState::Backoff { .. } => {
                    if let Some(timer) = self.timer.as_mut() {
                        timer.as_mut().await;
                    }
                    self.timer = None;
                    self.start_connecting();
                }
                ConnectionState::Connected => {
                    let Some(channel) = self.channel.as_mut() else {
                        self.schedule_backoff();
                        return ConnectionEvent::Closed(ConnectivityError::Closed);
                    };
                    match channel.recv().await {
                        Some(Ok(frame)) => return ConnectionEvent::Frame(frame),
                        Some(Err(e)) => {
                            warn!(topic = %self.topic, error = %e, "Channel error");
                            self.drop_channel();
                            self.schedule_backoff();
                            return ConnectionEvent::Closed(e);
                        }
                        None => {
                            info!(topic = %self.topic, "Channel closed by peer");
                            self.drop_channel();
                            self.schedule_backoff();
                            return ConnectionEvent::Closed(ConnectivityError::Closed);
                        }
                    }
                }
                ConnectionState::Disconnected | ConnectionState::Teardown => {
                    pending::<()>().await;
                }
            }
        }
    }
}
