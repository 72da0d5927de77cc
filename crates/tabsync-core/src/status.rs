//! Sync status of a store

use serde::{Deserialize, Serialize};

/// Observable sync health of one entity store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing pending and the channel is up
    Synced,
    /// Local mutations await acknowledgement
    Pending,
    /// No channel and nothing pending
    #[default]
    Offline,
    /// Overflowed queue or an undismissed rejection
    Error,
}

impl SyncStatus {
    /// Derive the status from the store's current conditions
    ///
    /// Precedence is error > pending > offline > synced.
    pub fn derive(has_error: bool, pending: usize, online: bool) -> Self {
        if has_error {
            SyncStatus::Error
        } else if pending > 0 {
            SyncStatus::Pending
        } else if !online {
            SyncStatus::Offline
        } else {
            SyncStatus::Synced
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Offline => write!(f, "offline"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_precedence() {
        assert_eq!(SyncStatus::derive(true, 3, false), SyncStatus::Error);
        assert_eq!(SyncStatus::derive(false, 1, false), SyncStatus::Pending);
        assert_eq!(SyncStatus::derive(false, 1, true), SyncStatus::Pending);
        assert_eq!(SyncStatus::derive(false, 0, false), SyncStatus::Offline);
        assert_eq!(SyncStatus::derive(false, 0, true), SyncStatus::Synced);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SyncStatus::Pending.to_string(), "pending");
        assert_eq!(
            serde_json::to_string(&SyncStatus::Synced).unwrap(),
            "\"synced\""
        );
    }
}
