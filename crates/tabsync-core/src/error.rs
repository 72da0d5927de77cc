//! Error types for tabsync
//!
//! The taxonomy follows how each failure is recovered: connectivity and
//! protocol failures are absorbed by the engine, rejections and overflow are
//! surfaced through [`SyncStatus`](crate::SyncStatus), cache corruption is a
//! cache miss.

use thiserror::Error;

use crate::identity::{EntityId, MutationId};

/// Top-level error type for tabsync
#[derive(Debug, Error)]
pub enum TabsyncError {
    #[error("Connectivity error: {0}")]
    Connectivity(#[from] ConnectivityError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Mutation rejected: {0}")]
    Rejected(#[from] MutationRejected),

    #[error("Queue overflow: {0}")]
    Overflow(#[from] QueueOverflow),

    #[error("Cache corruption: {0}")]
    Cache(#[from] CacheCorruption),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("Entity already exists: {0}")]
    DuplicateEntity(EntityId),

    #[error("Sync engine stopped")]
    EngineStopped,
}

/// Channel closed or unreachable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectivityError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection manager has been torn down")]
    TornDown,
}

/// Malformed or unexpected frame at the decode boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Entity type mismatch: expected {expected}, got {actual}")]
    EntityMismatch { expected: String, actual: String },
}

/// The server declined a queued mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mutation {mutation_id} on {entity_id} declined: {reason}")]
pub struct MutationRejected {
    pub mutation_id: MutationId,
    pub entity_id: EntityId,
    pub reason: String,
}

/// The offline queue grew past its high-water mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("offline queue holds {len} entries (high-water mark {high_water})")]
pub struct QueueOverflow {
    pub len: usize,
    pub high_water: usize,
}

/// A cached snapshot failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cache entry {key} unreadable: {reason}")]
pub struct CacheCorruption {
    pub key: String,
    pub reason: String,
}

/// Errors from the durable medium
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Medium I/O failed: {0}")]
    Io(String),

    #[error("Cannot encode value for the medium: {0}")]
    Serialization(String),
}

impl StorageError {
    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type alias for tabsync operations
pub type TabsyncResult<T> = Result<T, TabsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_error_display() {
        let err = ConnectivityError::ConnectFailed("refused".to_string());
        assert!(format!("{}", err).contains("Connection failed"));
        assert!(format!("{}", err).contains("refused"));

        assert!(format!("{}", ConnectivityError::Closed).contains("closed"));
        assert!(format!("{}", ConnectivityError::TornDown).contains("torn down"));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MalformedFrame("expected value".to_string());
        assert!(format!("{}", err).contains("Malformed frame"));

        let err = ProtocolError::EntityMismatch {
            expected: "order".to_string(),
            actual: "notification".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("order"));
        assert!(msg.contains("notification"));
    }

    #[test]
    fn test_rejection_display() {
        let err = MutationRejected {
            mutation_id: MutationId::generate(),
            entity_id: EntityId::new("o-7"),
            reason: "out of stock".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("o-7"));
        assert!(msg.contains("out of stock"));
    }

    #[test]
    fn test_overflow_display() {
        let err = QueueOverflow {
            len: 501,
            high_water: 500,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("501"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn test_io_failures_become_storage_errors() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: StorageError = io_err.into();
        assert_eq!(err, StorageError::Io("read-only".to_string()));

        let err: TabsyncError = err.into();
        assert!(format!("{}", err).contains("read-only"));
    }

    #[test]
    fn test_error_conversions() {
        let err: TabsyncError = ConnectivityError::Closed.into();
        assert!(matches!(err, TabsyncError::Connectivity(_)));

        let err: TabsyncError = ProtocolError::InvalidPayload("x".into()).into();
        assert!(matches!(err, TabsyncError::Protocol(_)));

        let err: TabsyncError = QueueOverflow {
            len: 2,
            high_water: 1,
        }
        .into();
        assert!(matches!(err, TabsyncError::Overflow(_)));

        let err: TabsyncError = CacheCorruption {
            key: "k".into(),
            reason: "eof".into(),
        }
        .into();
        assert!(matches!(err, TabsyncError::Cache(_)));

        let err: TabsyncError = ConfigError::Invalid("base > max".into()).into();
        assert!(format!("{}", err).contains("Config error"));

        let err = TabsyncError::UnknownEntity(EntityId::new("o-404"));
        assert!(format!("{}", err).contains("o-404"));
    }
}
