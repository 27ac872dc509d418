//! Backup manifest and archive entry naming.
//!
//! An archive holds one entry per collection plus a single manifest:
//!
//! ```text
//! users.json              successful snapshot of `users`
//! orders_ERROR.json       `orders` failed while encoding
//! _backup_metadata.json   manifest, always last
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SnapshotError;

/// Name of the manifest entry.
pub const MANIFEST_ENTRY: &str = "_backup_metadata.json";

/// Marker inserted before the suffix of a failed collection's entry.
pub const ERROR_MARKER: &str = "_ERROR";

/// Suffix of every JSON entry.
pub const ENTRY_SUFFIX: &str = ".json";

/// Entry name for a successfully captured collection.
pub fn data_entry_name(collection: &str) -> String {
    format!("{}{}", collection, ENTRY_SUFFIX)
}

/// Entry name for a collection that failed during encoding.
pub fn error_entry_name(collection: &str) -> String {
    format!("{}{}{}", collection, ERROR_MARKER, ENTRY_SUFFIX)
}

/// What an archive entry holds, judged by its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Document data for the named collection
    Data(String),
    /// The backup manifest
    Manifest,
    /// A failed collection's error description
    ErrorMarker,
    /// Anything else
    Ignored,
}

/// Classifies an entry name. Leading `./` segments written by some tar tools
/// are ignored.
pub fn classify_entry(name: &str) -> EntryKind {
    let mut name = name;
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }

    if name == MANIFEST_ENTRY {
        return EntryKind::Manifest;
    }
    let Some(stem) = name.strip_suffix(ENTRY_SUFFIX) else {
        return EntryKind::Ignored;
    };
    if name.contains(ERROR_MARKER) {
        return EntryKind::ErrorMarker;
    }
    if stem.is_empty() {
        return EntryKind::Ignored;
    }
    EntryKind::Data(stem.to_string())
}

/// Per-collection line of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestCollection {
    /// Collection name
    pub name: String,
    /// Documents captured
    pub documents: u64,
    /// MD5 of the entry bytes, lowercase hex
    #[serde(default)]
    pub md5: Option<String>,
    /// Time spent capturing this collection
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// A collection that was written as an error marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFailure {
    /// Collection name
    pub name: String,
    /// Error description
    pub error: String,
}

/// Snapshot descriptor written as the last archive entry.
///
/// Format:
/// ```json
/// {
///   "database": "app",
///   "created_at": "2026-10-18T09:30:00.000Z",
///   "collections_attempted": 2,
///   "collections_succeeded": 2,
///   "total_documents": 2,
///   "collections": [{"name": "users", "documents": 2, "md5": "..", "elapsed_ms": 3}],
///   "failed": [],
///   "elapsed_ms": 5,
///   "elapsed": "5ms",
///   "format": "extended-json/canonical",
///   "tool_version": "0.1.0"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Source database
    pub database: String,
    /// Capture start, RFC 3339 UTC
    pub created_at: String,
    /// Collections selected for the backup
    pub collections_attempted: usize,
    /// Collections written as data entries
    #[serde(default)]
    pub collections_succeeded: usize,
    /// Documents across successful collections
    pub total_documents: u64,
    /// Successful collections in archive order
    #[serde(default)]
    pub collections: Vec<ManifestCollection>,
    /// Failed collections in archive order
    #[serde(default)]
    pub failed: Vec<ManifestFailure>,
    /// Wall-clock duration of the backup
    #[serde(default)]
    pub elapsed_ms: u64,
    /// `elapsed_ms` in human-readable form
    #[serde(default)]
    pub elapsed: String,
    /// Text encoding of the data entries
    pub format: String,
    /// Version of the tool that wrote the archive
    #[serde(default)]
    pub tool_version: String,
}

impl Manifest {
    /// Builds a manifest from per-collection results.
    pub fn new(
        database: impl Into<String>,
        created_at: DateTime<Utc>,
        format: impl Into<String>,
        collections: Vec<ManifestCollection>,
        failed: Vec<ManifestFailure>,
        elapsed: Duration,
    ) -> Self {
        let total_documents = collections.iter().map(|c| c.documents).sum();
        // whole milliseconds keep the human form short
        let elapsed = Duration::from_millis(elapsed.as_millis() as u64);
        Self {
            database: database.into(),
            created_at: created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            collections_attempted: collections.len() + failed.len(),
            collections_succeeded: collections.len(),
            total_documents,
            collections,
            failed,
            elapsed_ms: elapsed.as_millis() as u64,
            elapsed: humantime::format_duration(elapsed).to_string(),
            format: format.into(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Serializes the manifest to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a manifest.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(json)
            .map_err(|e| SnapshotError::Archive(format!("Failed to parse manifest: {}", e)))
    }

    /// Recorded checksum for a collection's data entry.
    pub fn checksum_for(&self, collection: &str) -> Option<&str> {
        self.collections
            .iter()
            .find(|c| c.name == collection)
            .and_then(|c| c.md5.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_names() {
        assert_eq!(data_entry_name("users"), "users.json");
        assert_eq!(error_entry_name("users"), "users_ERROR.json");
    }

    #[test]
    fn test_classify_entries() {
        assert_eq!(classify_entry("users.json"), EntryKind::Data("users".into()));
        assert_eq!(classify_entry("./users.json"), EntryKind::Data("users".into()));
        assert_eq!(classify_entry("system.views.json"), EntryKind::Data("system.views".into()));
        assert_eq!(classify_entry("_backup_metadata.json"), EntryKind::Manifest);
        assert_eq!(classify_entry("users_ERROR.json"), EntryKind::ErrorMarker);
        assert_eq!(classify_entry("a_ERROR_b.json"), EntryKind::ErrorMarker);
        assert_eq!(classify_entry("notes.txt"), EntryKind::Ignored);
        assert_eq!(classify_entry(".json"), EntryKind::Ignored);
    }

    #[test]
    fn test_manifest_totals_and_round_trip() {
        let manifest = Manifest::new(
            "app",
            Utc::now(),
            "extended-json/canonical",
            vec![
                ManifestCollection {
                    name: "users".into(),
                    documents: 2,
                    md5: Some("abc".into()),
                    elapsed_ms: 1,
                },
                ManifestCollection {
                    name: "logs".into(),
                    documents: 0,
                    md5: None,
                    elapsed_ms: 0,
                },
            ],
            vec![ManifestFailure {
                name: "orders".into(),
                error: "boom".into(),
            }],
            Duration::from_millis(1500),
        );
        assert_eq!(manifest.collections_attempted, 3);
        assert_eq!(manifest.collections_succeeded, 2);
        assert_eq!(manifest.total_documents, 2);
        assert_eq!(manifest.elapsed, "1s 500ms");
        assert_eq!(manifest.checksum_for("users"), Some("abc"));
        assert_eq!(manifest.checksum_for("logs"), None);

        let parsed = Manifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_minimal_foreign_manifest_parses() {
        let json = r#"{
            "database": "legacy",
            "created_at": "2024-01-01T00:00:00Z",
            "collections_attempted": 1,
            "total_documents": 5,
            "format": "extended-json"
        }"#;
        let manifest = Manifest::from_json(json).unwrap();
        assert!(manifest.collections.is_empty());
        assert_eq!(manifest.total_documents, 5);
    }
}
