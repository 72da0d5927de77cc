//! # Tabsync Transport
//!
//! The server channel side of the sync engine.
//!
//! - [`protocol`]: JSON frames exchanged with the server, validated at the
//!   decode boundary into typed variants
//! - [`backoff`]: Exponential backoff with jitter
//! - [`connection`]: [`ConnectionManager`], one explicit state machine per
//!   topic with a single backoff timer
//! - [`ws`]: [`WsConnector`], the WebSocket [`Connector`](tabsync_core::Connector)
//!
//! `ConnectionManager::send` never buffers. Durability of outgoing mutations
//! is the offline queue's job.

pub mod backoff;
pub mod connection;
pub mod protocol;
pub mod ws;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use protocol::{ClientFrame, ServerFrame, decode_server_frame};
pub use ws::WsConnector;
