//! Identifiers
//!
//! - [`TabId`]: random per-tab sender id, generated once at startup
//! - [`EntityId`]: opaque entity id, either client-temporary or server-assigned
//! - [`MutationId`]: unique id of a local mutation, echoed back in acks

use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Prefix marking a client-generated, not yet reconciled entity id
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Identity of one tab (one engine instance)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    /// Generate a fresh random tab id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing id (tests, simulation)
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity identifier
///
/// Servers hand out either numeric or string ids; both are normalized to a
/// string on decode so `5` and `"5"` name the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a client-temporary id for an optimistic create
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple()))
    }

    /// Whether this id was generated locally and still awaits reconciliation
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Signed(n) => Self(n.to_string()),
            RawId::Unsigned(n) => Self(n.to_string()),
        })
    }
}

/// Identifier of a single local mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_ids_are_unique() {
        let a = TabId::generate();
        let b = TabId::generate();
        assert_ne!(a, b);
        assert_eq!(a.short_id().len(), 8);
    }

    #[test]
    fn test_temporary_entity_id() {
        let id = EntityId::temporary();
        assert!(id.is_temporary());
        assert!(!EntityId::new("o-99").is_temporary());
    }

    #[test]
    fn test_entity_id_accepts_numbers() {
        let numeric: EntityId = serde_json::from_str("5").unwrap();
        let text: EntityId = serde_json::from_str("\"5\"").unwrap();
        assert_eq!(numeric, text);
        assert_eq!(numeric, EntityId::from(5u64));

        let negative: EntityId = serde_json::from_str("-3").unwrap();
        assert_eq!(negative.as_str(), "-3");
    }

    #[test]
    fn test_entity_id_serializes_as_string() {
        let json = serde_json::to_string(&EntityId::from(42u64)).unwrap();
        assert_eq!(json, "\"42\"");
    }

    #[test]
    fn test_mutation_id_transparent() {
        let id = MutationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: MutationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
