//! # Tabsync Core
//!
//! Core traits, types, and errors for the tabsync real-time synchronization
//! engine.
//!
//! This crate provides the foundational abstractions that let the same store,
//! queue and broadcast logic run against an in-process simulation (for tests
//! and multi-tab simulation) and against a real duplex channel plus durable
//! storage.
//!
//! ## Key Traits
//!
//! - [`Entity`]: A synchronizable record (orders, notifications)
//! - [`SharedMedium`]: Durable, observable key-value medium shared by tabs
//! - [`Connector`] / [`Channel`]: Duplex text channel to the server
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`EntityId`]: Client-temporary or server-assigned entity identifier
//! - [`Mutation`]: A pending local change, as queued and sent to the server
//! - [`BroadcastMessage`]: Cross-tab notification envelope
//! - [`SyncStatus`]: Observable sync health of a store

pub mod entity;
pub mod error;
pub mod identity;
pub mod message;
pub mod mock_transport;
pub mod mutation;
pub mod status;
pub mod traits;
pub mod transport;

// Re-export main types
pub use entity::*;
pub use error::*;
pub use identity::*;
pub use message::*;
pub use mock_transport::*;
pub use mutation::*;
pub use status::*;
pub use traits::*;
pub use transport::*;
