//! Error types for snapshot operations.
//!
//! Errors are layered: [`ExtJsonError`] for the text codec, [`StoreError`] for
//! the database collaborator, and [`SnapshotError`] for whole-operation
//! failures surfaced to callers. Failures scoped to a single collection never
//! become a `SnapshotError`; they are recorded in the operation's report.

use std::io;
use thiserror::Error;

/// Errors raised while converting between Extended JSON text and values.
#[derive(Error, Debug)]
pub enum ExtJsonError {
    /// The text is not valid JSON.
    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    /// A recognised type tag carries a malformed payload.
    #[error("invalid {tag} value: {reason}")]
    InvalidTag {
        /// The tag key, e.g. `$oid`
        tag: &'static str,
        /// What was wrong with the payload
        reason: String,
    },

    /// The top-level value is not an array.
    #[error("expected a sequence of documents")]
    NotASequence,

    /// An array element or stored line is not a JSON object.
    #[error("element {index} is not a document")]
    NotADocument {
        /// Position of the offending element
        index: usize,
    },
}

/// Errors raised by a [`crate::store::DocumentStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The handle was used after `close`.
    #[error("connection is closed")]
    Closed,

    /// A database or collection name the store cannot represent.
    #[error("invalid name '{0}'")]
    InvalidName(String),

    /// A stored document could not be decoded.
    #[error("corrupt document in '{collection}' at line {line}: {source}")]
    Corrupt {
        /// Collection holding the document
        collection: String,
        /// 1-based line number in the collection file
        line: usize,
        /// Decoding failure
        #[source]
        source: ExtJsonError,
    },

    /// I/O error in a file-backed store.
    #[error(transparent)]
    IoError(#[from] io::Error),
}

/// Whole-operation errors for inventory, backup and restore.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// I/O error on the archive sink or source.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// Missing or invalid input, detected before any I/O.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The database could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The archive is unreadable or holds nothing to import.
    #[error("Invalid archive: {0}")]
    Archive(String),

    /// A store failure outside any single collection's scope.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SnapshotError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Connection(msg) => SnapshotError::Connection(msg),
            StoreError::Closed => SnapshotError::Connection("connection is closed".to_string()),
            other => SnapshotError::Store(other),
        }
    }
}

/// Response class of a whole-operation failure at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or invalid caller input (400-class).
    ClientInput,
    /// Connection or unrecoverable pipeline failure (500-class).
    Server,
}

impl SnapshotError {
    /// Classifies the error for the transport layer.
    pub fn class(&self) -> ErrorClass {
        match self {
            SnapshotError::Config(_) | SnapshotError::Archive(_) => ErrorClass::ClientInput,
            _ => ErrorClass::Server,
        }
    }
}
