//! Wire protocol
//!
//! Text frames are JSON objects discriminated by `type`:
//!
//! | direction | `type` | fields |
//! |---|---|---|
//! | client → server | `auth` | `userId`, `role` |
//! | client → server | `mutation` | `entityType`, `op`, `entityId`, `payload`, `mutationId` |
//! | server → client | `entity_event` | `entityType`, `op`, `payload`, `serverId`, `entityId?`, `mutationId?` |
//! | server → client | `ack` | `mutationId`, `serverId?` |
//! | server → client | `notification` | a notification object |
//! | server → client | `reject` | `mutationId`, `reason` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabsync_core::{EntityId, EntityKind, Mutation, MutationId, MutationOp, Notification, ProtocolError};

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every new connection
    #[serde(rename_all = "camelCase")]
    Auth { user_id: String, role: String },

    #[serde(rename_all = "camelCase")]
    Mutation {
        entity_type: EntityKind,
        op: MutationOp,
        entity_id: EntityId,
        payload: Value,
        mutation_id: MutationId,
    },
}

impl ClientFrame {
    pub fn auth(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        ClientFrame::Auth {
            user_id: user_id.into(),
            role: role.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}

impl From<&Mutation> for ClientFrame {
    fn from(m: &Mutation) -> Self {
        ClientFrame::Mutation {
            entity_type: m.entity_type,
            op: m.op,
            entity_id: m.entity_id.clone(),
            payload: m.payload.clone(),
            mutation_id: m.mutation_id,
        }
    }
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// An authoritative change to an entity
    #[serde(rename_all = "camelCase")]
    EntityEvent {
        entity_type: EntityKind,
        op: MutationOp,
        #[serde(default)]
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_id: Option<EntityId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity_id: Option<EntityId>,
        /// Present when the event answers one of our mutations
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mutation_id: Option<MutationId>,
    },

    #[serde(rename_all = "camelCase")]
    Ack {
        mutation_id: MutationId,
        /// Assigned id, present for creates
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_id: Option<EntityId>,
    },

    Notification(Notification),

    #[serde(rename_all = "camelCase")]
    Reject {
        mutation_id: MutationId,
        #[serde(default)]
        reason: String,
    },
}

impl ServerFrame {
    /// The entity an `entity_event` targets
    ///
    /// Taken from `entityId`, then `serverId`, then the payload's `id`.
    pub fn target_id(&self) -> Option<EntityId> {
        match self {
            ServerFrame::EntityEvent {
                entity_id,
                server_id,
                payload,
                ..
            } => entity_id
                .clone()
                .or_else(|| server_id.clone())
                .or_else(|| {
                    payload
                        .get("id")
                        .and_then(|id| serde_json::from_value(id.clone()).ok())
                }),
            ServerFrame::Notification(n) => Some(n.id.clone()),
            _ => None,
        }
    }
}

/// Decode and validate a server text frame
pub fn decode_server_frame(text: &str) -> Result<ServerFrame, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}
