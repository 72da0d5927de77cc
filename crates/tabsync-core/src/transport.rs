//! Duplex channel abstraction
//!
//! The server channel carries UTF-8 JSON text frames in both directions. A
//! [`Connector`] dials the server; the resulting [`Channel`] is owned by the
//! connection manager for its lifetime.

use async_trait::async_trait;

use crate::error::ConnectivityError;

/// An open duplex text channel
#[async_trait]
pub trait Channel: Send {
    /// Queue a frame for sending
    ///
    /// Never blocks; fails if the channel is already closed.
    fn send(&mut self, frame: String) -> Result<(), ConnectivityError>;

    /// Receive the next frame
    ///
    /// Returns `None` once the channel has closed. Must be cancel-safe: a
    /// dropped `recv` future loses no frame.
    async fn recv(&mut self) -> Option<Result<String, ConnectivityError>>;

    /// Close the channel; subsequent sends fail and `recv` yields `None`
    fn close(&mut self);
}

/// Dials the server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Channel>, ConnectivityError>;
}
