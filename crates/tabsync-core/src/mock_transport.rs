//! Mock channel implementation for testing
//!
//! Provides an in-memory server endpoint so the connection manager, queue
//! drain and engine loop can be exercised without a network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tabsync_core::{Connector, MockConnector};
//!
//! let (connector, mut server) = MockConnector::pair();
//! let mut channel = connector.connect("ws://test/orders").await.unwrap();
//!
//! channel.send("{\"type\":\"auth\"}".into()).unwrap();
//! assert!(server.recv_frame().await.is_some());
//!
//! server.push(r#"{"type":"ack","mutationId":"..."}"#);
//! let frame = channel.recv().await;
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConnectivityError;
use crate::transport::{Channel, Connector};

#[derive(Debug)]
struct MockState {
    /// Whether connects succeed
    online: bool,
    /// Generation of the live connection, if any
    current: Option<u64>,
    next_generation: u64,
    /// Server to client sender for the live connection
    to_client: Option<mpsc::UnboundedSender<String>>,
    /// Client to server sender shared by every connection
    to_server: mpsc::UnboundedSender<String>,
    connects: usize,
    urls: Vec<String>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector half handed to the engine
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

/// Server half driven by tests
#[derive(Debug)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
    inbox: mpsc::UnboundedReceiver<String>,
}

impl MockConnector {
    /// Create a connected connector/server pair; the server starts online
    pub fn pair() -> (MockConnector, MockServer) {
        let (to_server, inbox) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockState {
            online: true,
            current: None,
            next_generation: 0,
            to_client: None,
            to_server,
            connects: 0,
            urls: Vec::new(),
        }));
        (
            MockConnector {
                state: state.clone(),
            },
            MockServer { state, inbox },
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Channel>, ConnectivityError> {
        let mut state = lock(&self.state);
        state.connects += 1;
        state.urls.push(url.to_string());

        if !state.online {
            return Err(ConnectivityError::ConnectFailed("server unreachable".into()));
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        // A new connection replaces the old one, closing it
        let (tx, rx) = mpsc::unbounded_channel();
        state.to_client = Some(tx);
        state.current = Some(generation);

        Ok(Box::new(MockChannel {
            generation,
            inbox: rx,
            outbox: state.to_server.clone(),
            state: self.state.clone(),
            closed: false,
        }))
    }
}

impl MockServer {
    /// Toggle reachability; going offline also drops the live connection
    pub fn set_online(&self, online: bool) {
        let mut state = lock(&self.state);
        state.online = online;
        if !online {
            state.to_client = None;
            state.current = None;
        }
    }

    /// Push a frame to the connected client; returns false if none is connected
    pub fn push(&self, frame: impl Into<String>) -> bool {
        let state = lock(&self.state);
        match &state.to_client {
            Some(tx) => tx.send(frame.into()).is_ok(),
            None => false,
        }
    }

    /// Drop the live connection while staying reachable
    pub fn disconnect(&self) {
        let mut state = lock(&self.state);
        state.to_client = None;
        state.current = None;
    }

    /// Whether a client is currently connected
    pub fn is_connected(&self) -> bool {
        lock(&self.state).current.is_some()
    }

    /// Number of connection attempts observed, successful or not
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }

    /// URLs of every connection attempt in order
    pub fn connect_urls(&self) -> Vec<String> {
        lock(&self.state).urls.clone()
    }

    /// Wait for the next frame sent by a client
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.inbox.recv().await
    }

    /// Take a frame if one is already waiting
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.inbox.try_recv().ok()
    }

    /// Take every frame already waiting
    pub fn drain_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.inbox.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Client end of a mock connection
#[derive(Debug)]
pub struct MockChannel {
    generation: u64,
    inbox: mpsc::UnboundedReceiver<String>,
    outbox: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockChannel {
    fn is_live(&self) -> bool {
        !self.closed && lock(&self.state).current == Some(self.generation)
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn send(&mut self, frame: String) -> Result<(), ConnectivityError> {
        if !self.is_live() {
            return Err(ConnectivityError::Closed);
        }
        self.outbox
            .send(frame)
            .map_err(|e| ConnectivityError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectivityError>> {
        if self.closed {
            return None;
        }
        self.inbox.recv().await.map(Ok)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inbox.close();
        let mut state = lock(&self.state);
        if state.current == Some(self.generation) {
            state.current = None;
            state.to_client = None;
        }
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.close();
    }
}
