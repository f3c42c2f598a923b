//! Error types for Health Record

use thiserror::Error;

/// Main error type for Health Record operations
#[derive(Error, Debug)]
pub enum RecordError {
    /// Import text could not be parsed into either snapshot shape
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A version-gated field is still unset after import
    ///
    /// Not always fatal: a peer may supply the field through a later merge.
    #[error("Migration incomplete: {field} is not set")]
    MigrationIncomplete {
        /// Dotted path of the missing field
        field: &'static str,
    },

    /// Peer transport could not be opened or failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No record is loaded into the store
    #[error("No record loaded")]
    NotLoaded,

    /// Automerge document error
    #[error("Automerge error: {0}")]
    Automerge(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

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

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<automerge::AutomergeError> for RecordError {
    fn from(err: automerge::AutomergeError) -> Self {
        RecordError::Automerge(err.to_string())
    }
}

/// Failures reported by a peer transport
///
/// Transport errors are local state. They are never written into the
/// replicated document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No signaling endpoint was configured and the transport requires one
    #[error("no signaling endpoint configured")]
    NoSignaling,

    /// The transport refused the session
    #[error("session rejected: {0}")]
    Rejected(String),

    /// The transport was closed underneath the session
    #[error("transport closed")]
    Closed,
}

/// Result type alias using RecordError
pub type RecordResult<T> = Result<T, RecordError>;
