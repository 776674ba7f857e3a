//! Error types for HabitSync

use thiserror::Error;

/// Main error type for HabitSync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Entity payload could not be decoded into its typed snapshot
    #[error("Malformed {entity_type} payload: {message}")]
    MalformedPayload {
        /// Entity type tag of the payload
        entity_type: String,
        /// Decoder message
        message: String,
    },

    /// A single request failed but the network is usable (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// The remote store cannot be reached at all; the whole drain is aborted
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// The remote store answered with a non-success status
    #[error("Remote rejected request ({status}): {message}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// A sync pass or drain is already running
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Operation requires connectivity
    #[error("Offline: {0}")]
    Offline(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
