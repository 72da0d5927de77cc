//! # Tabsync Store
//!
//! Per-tab entity collections.
//!
//! An [`EntityStore`] is the canonical in-memory view of one entity type in
//! one tab. Local edits apply optimistically and are queued durably; remote
//! changes merge idempotently, so duplicate or reordered delivery from the
//! channel or from sibling tabs cannot corrupt state.
//!
//! Two sources of truth are kept apart:
//!
//! - the **confirmed** map: what the server has acknowledged or pushed over
//!   the channel. It is the rollback target and what gets cached.
//! - the **visible** map: confirmed state plus pending local mutations plus
//!   broadcast hints from sibling tabs.
//!
//! ## Key Types
//!
//! - [`EntityStore`]: generic store
//! - [`OrderStore`]: order helpers (`add_order`, `update_status`, `delete_order`)
//! - [`NotificationCenter`]: read/unread bookkeeping and presentation
//! - [`SnapshotSource`]: full-collection fetch collaborator

pub mod issue;
pub mod notifications;
pub mod orders;
pub mod snapshot;
pub mod store;

pub use issue::{IssueId, IssueKind, SyncIssue};
pub use notifications::{NotificationCenter, Presenter, RecordingPresenter, TracingPresenter};
pub use orders::{NewOrder, OrderStore};
pub use snapshot::{MemorySnapshotSource, SnapshotSource};
pub use store::{Applied, ChangeSource, EntityStore, StoreContext};
