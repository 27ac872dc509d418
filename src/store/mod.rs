//! Database collaborator interface and the bundled stores.
//!
//! The pipeline only talks to a [`DocumentStore`]. Two implementations ship
//! with the crate:
//!
//! - [`MemoryStore`]: process-local, used for tests and embedding
//! - [`DirStore`]: one JSON-lines file per collection under
//!   `<root>/<database>/`

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::path::PathBuf;
use tokio_retry2::{Retry, RetryError};
use tracing::{info, warn};

use crate::error::{SnapshotError, StoreError};
use crate::extjson::{self, ExtJsonMode};
use crate::types::ConnectionConfig;
use crate::value::{Document, ObjectId};

/// Lazy, fallible sequence of documents returned by [`DocumentStore::find_all`].
pub type DocumentStream = BoxStream<'static, Result<Document, StoreError>>;

/// Result of an unordered bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Documents stored
    pub inserted: u64,
    /// Documents rejected (duplicate `_id`, unserializable values)
    pub failed: u64,
}

/// A connection to one database of a document store.
///
/// Implementations own their connection exclusively; callers must invoke
/// [`close`](DocumentStore::close) when done, after which every other method
/// fails with [`StoreError::Closed`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the connected database.
    fn database_name(&self) -> &str;

    /// Names of all collections in the database.
    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError>;

    /// Number of documents in a collection; 0 for a missing collection.
    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError>;

    /// Every document of a collection, unfiltered, as a lazy stream.
    async fn find_all(&self, collection: &str) -> Result<DocumentStream, StoreError>;

    /// Inserts a batch without ordering guarantees.
    ///
    /// A document that violates `_id` uniqueness or cannot be stored is counted
    /// in [`InsertOutcome::failed`] and does not prevent its siblings from being
    /// inserted. Documents without `_id` receive a generated [`ObjectId`].
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, StoreError>;

    /// Releases the connection.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Rejects names that cannot be used as a database, collection or archive
/// entry name.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// Gives a document an `_id` if it has none.
pub(crate) fn ensure_id(doc: &mut Document) {
    if doc.get("_id").is_none() {
        doc.insert_first("_id", ObjectId::generate());
    }
}

/// Canonical text of a document's `_id`, used as its uniqueness key.
pub(crate) fn identity_key(doc: &Document) -> Option<String> {
    doc.get("_id")
        .map(|id| extjson::to_json(id, ExtJsonMode::Canonical).to_string())
}

/// Where a connection URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StoreTarget {
    Directory(PathBuf),
    Memory,
}

impl StoreTarget {
    fn parse(url: &str) -> Result<Self, SnapshotError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SnapshotError::Config("database URL is required".to_string()));
        }
        if url == "memory://" || url == "memory:" {
            return Ok(StoreTarget::Memory);
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(StoreTarget::Directory(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(SnapshotError::Config(format!(
                "unsupported store scheme '{}://' (expected file:// or memory://)",
                scheme
            )));
        }
        Ok(StoreTarget::Directory(PathBuf::from(url)))
    }

    async fn open(&self, database: &str) -> Result<Box<dyn DocumentStore>, StoreError> {
        match self {
            StoreTarget::Directory(root) => Ok(Box::new(DirStore::open(root, database).await?)),
            StoreTarget::Memory => Ok(Box::new(MemoryStore::new(database))),
        }
    }
}

/// Opens a store connection for the configured database.
///
/// Each attempt is bounded by `connect_timeout`; failed attempts are retried
/// `connect_retries` times with a fixed pause. Input problems (empty URL or
/// database, unknown scheme, invalid database name) fail immediately as
/// configuration errors.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn DocumentStore>, SnapshotError> {
    let target = StoreTarget::parse(&config.url)?;
    if config.database.trim().is_empty() {
        return Err(SnapshotError::Config("database name is required".to_string()));
    }
    validate_name(&config.database).map_err(|e| SnapshotError::Config(e.to_string()))?;

    let retry_strategy =
        tokio_retry2::strategy::FixedInterval::from_millis(config.retry_interval.as_millis() as u64)
            .take(config.connect_retries);

    let store = Retry::spawn(retry_strategy, || {
        let target = target.clone();
        async move {
            match tokio::time::timeout(config.connect_timeout, target.open(&config.database)).await
            {
                Ok(Ok(store)) => Ok(store),
                Ok(Err(e)) => {
                    warn!("Failed to connect to {}: {}", config.url, e);
                    RetryError::to_transient(e)
                }
                Err(_) => {
                    warn!(
                        "Connection to {} timed out after {}",
                        config.url,
                        humantime::format_duration(config.connect_timeout)
                    );
                    RetryError::to_transient(StoreError::Connection(format!(
                        "timed out after {}",
                        humantime::format_duration(config.connect_timeout)
                    )))
                }
            }
        }
    })
    .await?;

    info!("Connected to database '{}' at {}", config.database, config.url);
    Ok(store)
}
