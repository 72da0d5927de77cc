//! # Tabsync Broadcast
//!
//! Cross-tab publish/subscribe built over a [`SharedMedium`].
//!
//! Publishing writes the message under one namespaced key and removes it right
//! away; the write/remove pair is the signal, nothing stays persisted. Every
//! tab watching the medium sees the write, drops its own messages (anti-echo)
//! and suppresses redelivery through a bounded recently-seen set.
//!
//! Delivery is at-least-once to tabs subscribed at publish time, ordered per
//! sender, with no ordering across senders. A subscriber that falls behind
//! the medium gets a [`BusEvent::Lagged`] instead of a silent gap.
//!
//! [`SharedMedium`]: tabsync_core::SharedMedium

pub mod bus;
pub mod seen;

pub use bus::{BroadcastBus, BroadcastConfig, BusEvent, BusSubscriber};
pub use seen::SeenSet;
