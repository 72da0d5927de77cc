//! Synchronizable entities
//!
//! Entities travel as JSON objects on every boundary (wire, broadcast, cache),
//! so the typed structs here are the validation point: a payload that does not
//! decode into the concrete type never reaches a store.

use std::fmt::{self, Debug, Display};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::identity::EntityId;

/// Kind of entity a store, mutation or frame refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Order,
    Notification,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Order => "order",
            EntityKind::Notification => "notification",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record held by an entity store
pub trait Entity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The kind tag used on the wire and in storage keys
    const KIND: EntityKind;

    fn id(&self) -> &EntityId;

    fn set_id(&mut self, id: EntityId);

    /// Last modification time as recorded by the writer, if tracked
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Decode a JSON payload into a concrete entity
pub fn decode_entity<T: Entity>(payload: &Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| ProtocolError::InvalidPayload(format!("{}: {}", T::KIND, e)))
}

/// Shallow-merge a JSON object patch into an entity
///
/// Top-level keys of `patch` replace the entity's fields; nested values are
/// replaced wholesale. The `id` key is never taken from the patch. The result
/// is re-validated against `T`.
pub fn shallow_merge<T: Entity>(entity: &T, patch: &Value) -> Result<T, ProtocolError> {
    let patch = patch
        .as_object()
        .ok_or_else(|| ProtocolError::InvalidPayload("update patch must be an object".into()))?;

    let mut base = serde_json::to_value(entity)
        .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
    let fields = base
        .as_object_mut()
        .ok_or_else(|| ProtocolError::InvalidPayload("entity is not an object".into()))?;

    for (key, value) in patch {
        if key == "id" {
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }

    let mut merged: T = decode_entity(&base)?;
    merged.set_id(entity.id().clone());
    Ok(merged)
}

// ============================================================================
// Orders
// ============================================================================

/// Lifecycle of an order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Delivered,
    Cancelled,
}

/// One line of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    /// Price per unit in minor currency units
    pub unit_price: i64,
}

/// A customer order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: EntityId,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    /// Total in minor currency units
    #[serde(default)]
    pub total_amount: i64,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Order {
    const KIND: EntityKind = EntityKind::Order;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// How prominently a notification is presented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Notification {
    const KIND: EntityKind = EntityKind::Notification;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}
