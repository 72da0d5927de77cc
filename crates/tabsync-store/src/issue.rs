//! Surfaced sync problems

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tabsync_core::{EntityId, EntityKind, MutationId, MutationOp, MutationRejected};

/// Why a local mutation did not take effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The server declined it
    Rejected,
    /// It sat in the offline queue past the configured maximum age
    Expired,
}

/// Identifies an issue among all of a tab's stores
///
/// Sequence numbers are per store, so the entity type is part of the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueId {
    pub kind: EntityKind,
    pub seq: u64,
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.seq)
    }
}

/// A dismissible, user-facing record of a rolled-back mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub id: IssueId,
    pub kind: IssueKind,
    pub entity_type: EntityKind,
    pub entity_id: EntityId,
    pub mutation_id: MutationId,
    pub op: MutationOp,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl SyncIssue {
    pub fn to_rejection(&self) -> MutationRejected {
        MutationRejected {
            mutation_id: self.mutation_id,
            entity_id: self.entity_id.clone(),
            reason: self.reason.clone(),
        }
    }
}
