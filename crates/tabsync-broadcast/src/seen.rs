//! Bounded recently-seen set

use std::collections::{HashSet, VecDeque};

use tabsync_core::TabId;

/// Remembers the last `capacity` (sender, message id) pairs
///
/// Oldest entries are forgotten first.
#[derive(Debug, Clone)]
pub struct SeenSet {
    capacity: usize,
    order: VecDeque<(TabId, u64)>,
    members: HashSet<(TabId, u64)>,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Record a message; returns `false` if it was already seen
    pub fn insert(&mut self, sender: &TabId, message_id: u64) -> bool {
        let key = (sender.clone(), message_id);
        if self.members.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.members.insert(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
