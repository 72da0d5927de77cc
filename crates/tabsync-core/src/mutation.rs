//! Local mutations
//!
//! A [`Mutation`] is born when a tab changes an entity optimistically. It is
//! queued durably, sent to the server, and removed only on acknowledgement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityKind;
use crate::identity::{EntityId, MutationId, TabId};

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl MutationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Create => "create",
            MutationOp::Update => "update",
            MutationOp::Delete => "delete",
        }
    }
}

impl std::fmt::Display for MutationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local change awaiting server acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub mutation_id: MutationId,
    pub entity_type: EntityKind,
    pub op: MutationOp,
    /// Target entity; a temporary id for creates until reconciled
    pub entity_id: EntityId,
    /// Full entity for creates, patch object for updates, `null` for deletes
    #[serde(default)]
    pub payload: Value,
    pub origin_tab: TabId,
    pub client_timestamp: DateTime<Utc>,
}

impl Mutation {
    /// Create a new mutation with a fresh id
    pub fn new(
        entity_type: EntityKind,
        op: MutationOp,
        entity_id: EntityId,
        payload: Value,
        origin_tab: TabId,
        client_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            mutation_id: MutationId::generate(),
            entity_type,
            op,
            entity_id,
            payload,
            origin_tab,
            client_timestamp,
        }
    }

    /// Point this mutation at a reconciled id
    ///
    /// Rewrites both the target id and an `id` field inside the payload.
    /// Returns whether anything changed.
    pub fn remap_entity(&mut self, from: &EntityId, to: &EntityId) -> bool {
        if &self.entity_id != from {
            return false;
        }
        self.entity_id = to.clone();
        if let Some(fields) = self.payload.as_object_mut() {
            if fields.contains_key("id") {
                fields.insert("id".to_string(), Value::String(to.as_str().to_string()));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(id: &EntityId) -> Mutation {
        Mutation::new(
            EntityKind::Order,
            MutationOp::Create,
            id.clone(),
            json!({"id": id.as_str(), "totalAmount": 1000}),
            TabId::new("tab-a"),
            Utc::now(),
        )
    }

    #[test]
    fn test_remap_rewrites_target_and_payload() {
        let temp = EntityId::temporary();
        let mut m = create(&temp);
        assert!(m.remap_entity(&temp, &EntityId::new("o-99")));
        assert_eq!(m.entity_id, EntityId::new("o-99"));
        assert_eq!(m.payload["id"], "o-99");
    }

    #[test]
    fn test_remap_ignores_other_entities() {
        let mut m = create(&EntityId::new("o-1"));
        assert!(!m.remap_entity(&EntityId::new("o-2"), &EntityId::new("o-3")));
        assert_eq!(m.entity_id, EntityId::new("o-1"));
    }

    #[test]
    fn test_mutation_json_is_camel_case() {
        let m = create(&EntityId::new("o-1"));
        let value = serde_json::to_value(&m).unwrap();
        assert!(value.get("mutationId").is_some());
        assert_eq!(value["entityType"], "order");
        assert_eq!(value["op"], "create");
        assert!(value.get("clientTimestamp").is_some());
    }
}
