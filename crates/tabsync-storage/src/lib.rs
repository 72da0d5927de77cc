//! # Tabsync Storage
//!
//! Durable state for the tabsync engine.
//!
//! Everything here sits on a [`SharedMedium`], the key-value store all tabs of
//! one origin share.
//!
//! ## Features
//!
//! - **MemoryMedium**: In-process observable medium; clones share state, so
//!   several simulated tabs see each other's writes
//! - **FileMedium**: Directory-backed medium that survives a restart
//! - **CacheLayer**: Timestamped entity snapshots for instant hydration
//! - **OfflineQueue**: Durable FIFO log of pending local mutations
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tabsync_core::{EntityKind, TabId};
//! use tabsync_storage::{MemoryMedium, OfflineQueue, QueueConfig};
//!
//! let medium = Arc::new(MemoryMedium::new());
//! let tab = TabId::new("tab-a");
//! let mut queue =
//!     OfflineQueue::open(medium, "tabsync", &tab, EntityKind::Order, QueueConfig::default());
//! queue.enqueue(mutation)?;
//! assert_eq!(queue.len(), 1);
//! ```

pub mod cache;
pub mod file;
pub mod memory;
pub mod queue;

pub use cache::{CacheLayer, CachedSnapshot};
pub use file::FileMedium;
pub use memory::MemoryMedium;
pub use queue::{DrainHalt, DrainOutcome, EntryState, OfflineQueue, QueueConfig, QueueEntry};

pub use tabsync_core::{MediumEvent, SharedMedium};

/// Capacity of the change-notification channel of a medium
pub const WATCH_CAPACITY: usize = 1024;
