//! Cross-tab message envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityKind;
use crate::identity::{EntityId, TabId};

/// What a broadcast announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusAction {
    Create,
    Update,
    Delete,
    /// A temporary id was replaced by a server id
    Reconcile,
}

/// Envelope written to the shared medium by the broadcast bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub action: BusAction,
    pub data: Value,
    pub sender_id: TabId,
    /// Monotonically increasing per sender
    pub message_id: u64,
    pub timestamp: DateTime<Utc>,
}

/// Body of entity broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    pub entity_type: EntityKind,
    pub entity_id: EntityId,
    #[serde(default)]
    pub payload: Value,
    /// Set on [`BusAction::Reconcile`]: the id replacing `entity_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<EntityId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_message_shape() {
        let msg = BroadcastMessage {
            action: BusAction::Reconcile,
            data: json!({}),
            sender_id: TabId::new("tab-a"),
            message_id: 3,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["action"], "reconcile");
        assert_eq!(value["senderId"], "tab-a");
        assert_eq!(value["messageId"], 3);
    }

    #[test]
    fn test_entity_change_accepts_numeric_id() {
        let change: EntityChange =
            serde_json::from_value(json!({"entityType": "order", "entityId": 5})).unwrap();
        assert_eq!(change.entity_id, EntityId::new("5"));
        assert!(change.payload.is_null());
        assert!(change.server_id.is_none());
    }
}
