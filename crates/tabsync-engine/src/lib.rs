//! # Tabsync Engine
//!
//! Wires the stores, the offline queues, the cross-tab bus and one server
//! channel per topic into a single event loop per tab.
//!
//! ```ignore
//! use tabsync_engine::{SyncConfig, SyncEngine};
//! use tabsync_store::NewOrder;
//!
//! let config = SyncConfig::load("tabsync.toml")?;
//! let (engine, handle) = SyncEngine::builder(config).build()?;
//! engine.spawn();
//!
//! // Visible immediately, delivered whenever the channel allows
//! let id = handle.add_order(NewOrder::new("Ada").item("Tea", 2, 350)).await?;
//! ```
//!
//! ## Delivery
//!
//! Each topic drains its own queue strictly in order, one mutation in flight
//! at a time. A mutation leaves the queue only on ack or rejection; a missing
//! ack is retried after backoff. Reconnects reset in-flight entries so they go
//! out again.
//!
//! ## Resync
//!
//! On every (re)connect and periodically while connected the engine refetches
//! full snapshots. A snapshot that started before a channel change landed is
//! discarded rather than allowed to roll that change back.

pub mod config;
pub mod engine;
pub mod handle;
pub mod lane;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use handle::{SyncHandle, SyncState};
pub use lane::Topic;
