//! Data structures shared by the inventory, backup and restore operations.

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::extjson::ExtJsonMode;
use crate::metadata::Manifest;

/// Default number of documents per unordered insert batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Configuration for opening a database connection.
///
/// # Example
///
/// ```
/// use docsnap::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig {
///     url: "file:///var/lib/docsnap".to_string(),
///     database: "app".to_string(),
///     connect_timeout: Duration::from_secs(5),
///     connect_retries: 2,
///     retry_interval: Duration::from_millis(500),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Store URL (`file://<dir>`, a bare directory path, or `memory://`)
    pub url: String,
    /// Database name within the store
    pub database: String,
    /// Upper bound for a single connection attempt (default: 10s).
    pub connect_timeout: Duration,
    /// Additional attempts after the first one fails (default: 2).
    pub connect_retries: usize,
    /// Pause between connection attempts (default: 1s).
    pub retry_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "file://./data".to_string(),
            database: "test".to_string(),
            connect_timeout: Duration::from_secs(10),
            connect_retries: 2,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Which collections a backup captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionSelection {
    /// Every collection of the database, sorted by name
    All,
    /// The named collections, in the given order
    Named(Vec<String>),
}

/// Options for [`crate::backup`].
#[derive(Clone, Default)]
pub struct BackupOptions {
    /// Extended JSON flavour of the data entries
    pub mode: ExtJsonMode,
    /// Per-collection progress display
    pub progress: Option<ProgressBar>,
}

/// Options for [`crate::restore`].
#[derive(Clone)]
pub struct RestoreOptions {
    /// Documents per unordered insert (default: 1000)
    pub batch_size: usize,
    /// Per-collection progress display
    pub progress: Option<ProgressBar>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress: None,
        }
    }
}

/// Whether a collection's document count could be read.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CountStatus {
    /// Count is accurate
    Ok,
    /// Count query failed; the count reads 0
    CountUnavailable,
}

/// One row of the collection inventory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Collection name
    pub name: String,
    /// Document count, 0 when unavailable
    pub count: u64,
    /// Whether `count` is meaningful
    pub status: CountStatus,
    /// Why the count is unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Collections of a database with their document counts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    /// Database name
    pub database: String,
    /// Per-collection rows, sorted by name
    pub collections: Vec<CollectionInfo>,
    /// Number of collections
    pub total_collections: usize,
    /// Sum of the available counts
    pub total_documents: u64,
}

/// Outcome of one collection during a backup.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Written as `<name>.json`
    Success,
    /// Written as `<name>_ERROR.json`
    Error,
}

/// Per-collection line of a backup report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionBackup {
    /// Collection name
    pub name: String,
    /// Outcome
    pub status: BackupStatus,
    /// Documents written, 0 on error
    pub documents: u64,
    /// Archive entry name
    pub entry: String,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a backup run.
#[derive(Serialize, Debug, Clone)]
pub struct BackupReport {
    /// Per-collection results in selection order
    pub collections: Vec<CollectionBackup>,
    /// Manifest written as the last archive entry
    pub manifest: Manifest,
}

impl BackupReport {
    /// Documents captured by successful collections.
    pub fn total_documents(&self) -> u64 {
        self.manifest.total_documents
    }

    /// Number of collections written as error markers.
    pub fn failed(&self) -> usize {
        self.collections
            .iter()
            .filter(|c| c.status == BackupStatus::Error)
            .count()
    }
}

/// Outcome of one collection during a restore.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// Documents were submitted to the store
    Success,
    /// The entry held an empty sequence
    Skipped,
    /// The collection could not be imported
    Error,
}

/// Per-collection line of a restore report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionImport {
    /// Target collection name
    pub name: String,
    /// Outcome
    pub status: ImportStatus,
    /// Sum of attempted batch sizes
    pub imported: u64,
    /// Documents the store accepted
    pub inserted: u64,
    /// Documents the store rejected inside unordered batches
    pub failed: u64,
    /// Failure description for `Error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the entry matched the manifest checksum, when one was listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_verified: Option<bool>,
}

impl CollectionImport {
    pub(crate) fn error(name: &str, message: String, checksum_verified: Option<bool>) -> Self {
        Self {
            name: name.to_string(),
            status: ImportStatus::Error,
            imported: 0,
            inserted: 0,
            failed: 0,
            error: Some(message),
            checksum_verified,
        }
    }
}

/// Result of a restore run.
#[derive(Serialize, Debug, Clone)]
pub struct RestoreReport {
    /// Target database
    pub database: String,
    /// Per-collection results in archive order
    pub collections: Vec<CollectionImport>,
    /// Sum of `imported` across collections
    pub total_imported: u64,
    /// Wall-clock duration in milliseconds
    pub elapsed_ms: u64,
    /// Manifest found in the archive, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
}

impl RestoreReport {
    /// Finds the result for a collection.
    pub fn collection(&self, name: &str) -> Option<&CollectionImport> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Counts results with the given status.
    pub fn count(&self, status: ImportStatus) -> usize {
        self.collections.iter().filter(|c| c.status == status).count()
    }
}
