//! docsnap - Back up and restore document database collections
//!
//! This library captures the collections of a document database into a single
//! gzip-compressed tar archive of Extended JSON entries, and restores such
//! archives back into a database with per-collection failure isolation.
//!
//! # Features
//!
//! - **Type Fidelity**: identifiers, dates, binary payloads, regular
//!   expressions, 64-bit integers and decimals survive the round trip
//! - **Streaming Output**: the archive is written incrementally to any
//!   `std::io::Write` sink, one collection in memory at a time
//! - **Failure Isolation**: a collection that fails to back up becomes an
//!   error marker entry; a collection that fails to restore is reported
//!   without blocking the others
//! - **Batched Restore**: unordered bulk inserts in batches of 1000 documents
//! - **Integrity Checks**: per-entry MD5 checksums recorded in the manifest and
//!   verified on restore
//!
//! # Archive layout
//!
//! ```text
//! users.json              one entry per captured collection
//! orders_ERROR.json       a collection that failed during backup
//! _backup_metadata.json   manifest, always last
//! ```
//!
//! # Example
//!
//! ```no_run
//! use docsnap::{MemoryStore, SnapshotDecoder, SnapshotEncoder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = MemoryStore::new("app");
//! let (_report, archive) = SnapshotEncoder::new(&source)
//!     .encode(&["users".to_string()], Vec::new())
//!     .await?;
//!
//! let target = MemoryStore::new("app");
//! let report = SnapshotDecoder::new(&target).decode(&archive).await?;
//! println!("{} documents restored", report.total_imported);
//! # Ok(())
//! # }
//! ```

pub mod decode;
pub mod encode;
pub mod error;
pub mod extjson;
mod extract;
pub mod inventory;
pub mod metadata;
mod orchestrator;
pub mod store;
pub mod types;
pub mod value;
mod verify;

pub use decode::SnapshotDecoder;
pub use encode::SnapshotEncoder;
pub use error::{ErrorClass, ExtJsonError, SnapshotError, StoreError};
pub use extjson::ExtJsonMode;
pub use inventory::list_collections;
pub use metadata::Manifest;
pub use orchestrator::{backup, inventory, restore};
pub use store::{connect, DirStore, DocumentStore, InsertOutcome, MemoryStore};
pub use types::{
    BackupOptions, BackupReport, BackupStatus, CollectionBackup, CollectionImport,
    CollectionInfo, CollectionSelection, ConnectionConfig, CountStatus, ImportStatus, Inventory,
    RestoreOptions, RestoreReport, DEFAULT_BATCH_SIZE,
};
pub use value::{Document, ObjectId, Scalar, Value};
