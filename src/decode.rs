//! Snapshot decoder: restores archive entries into a store.

use indicatif::ProgressBar;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::{ExtJsonError, SnapshotError, StoreError};
use crate::extjson;
use crate::extract::{read_archive, ArchiveEntry};
use crate::metadata::Manifest;
use crate::store::DocumentStore;
use crate::types::{CollectionImport, ImportStatus, RestoreReport, DEFAULT_BATCH_SIZE};
use crate::value::Document;
use crate::verify::verify_entry;

/// Failure while importing a single collection.
#[derive(Error, Debug)]
enum ImportError {
    #[error("entry is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Parse(#[from] ExtJsonError),

    #[error("insert failed: {0}")]
    Insert(#[from] StoreError),
}

#[derive(Debug, Default)]
struct Imported {
    attempted: u64,
    inserted: u64,
    failed: u64,
}

/// Restores the collections of an archive into a store.
///
/// Entries are imported independently: a malformed entry or a failed insert
/// is recorded as an `error` result for that collection only.
pub struct SnapshotDecoder<'a> {
    store: &'a dyn DocumentStore,
    batch_size: usize,
    progress: Option<ProgressBar>,
}

impl<'a> SnapshotDecoder<'a> {
    /// Creates a decoder inserting [`DEFAULT_BATCH_SIZE`] documents per batch.
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            progress: None,
        }
    }

    /// Sets the number of documents per unordered insert.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Reports per-collection progress on `pb`.
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    /// Imports every data entry of `archive`.
    ///
    /// # Errors
    ///
    /// `SnapshotError::Config` for a zero batch size;
    /// `SnapshotError::Archive` if the archive cannot be read or holds no
    /// importable entry. Per-collection failures are reported in the result.
    pub async fn decode(&self, archive: &[u8]) -> Result<RestoreReport, SnapshotError> {
        if self.batch_size == 0 {
            return Err(SnapshotError::Config(
                "batch size must be at least 1".to_string(),
            ));
        }
        let started = Instant::now();

        let contents = read_archive(archive)?;
        if contents.imports.is_empty() {
            return Err(SnapshotError::Archive(
                "archive contains no importable collections".to_string(),
            ));
        }
        if !contents.error_markers.is_empty() {
            warn!(
                "Archive records {} collection(s) that failed during backup: {}",
                contents.error_markers.len(),
                contents.error_markers.join(", ")
            );
        }

        let manifest = contents
            .manifest
            .as_deref()
            .and_then(|bytes| match std::str::from_utf8(bytes) {
                Ok(text) => match Manifest::from_json(text) {
                    Ok(m) => Some(m),
                    Err(e) => {
                        warn!("Ignoring manifest: {}", e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Ignoring manifest: not UTF-8: {}", e);
                    None
                }
            });

        info!(
            "Restoring {} collection(s) into '{}'",
            contents.imports.len(),
            self.store.database_name()
        );
        if let Some(pb) = &self.progress {
            pb.set_length(contents.imports.len() as u64);
        }

        let mut results = Vec::with_capacity(contents.imports.len());
        for entry in &contents.imports {
            if let Some(pb) = &self.progress {
                pb.set_message(format!("📥 {}", entry.collection));
            }

            let checksum_verified = manifest
                .as_ref()
                .and_then(|m| verify_entry(m, &entry.collection, &entry.bytes));
            if checksum_verified == Some(false) {
                warn!("⚠️  Checksum mismatch for {}", entry.name);
            }

            let result = match self.import_entry(entry).await {
                Ok(imported) if imported.attempted == 0 => {
                    info!("⏭️  {}: empty, skipped", entry.collection);
                    CollectionImport {
                        name: entry.collection.clone(),
                        status: ImportStatus::Skipped,
                        imported: 0,
                        inserted: 0,
                        failed: 0,
                        error: None,
                        checksum_verified,
                    }
                }
                Ok(imported) => {
                    if imported.failed > 0 {
                        warn!(
                            "{}: {} of {} document(s) rejected by the store",
                            entry.collection, imported.failed, imported.attempted
                        );
                    }
                    info!(
                        "✅ {}: {} document(s) imported",
                        entry.collection, imported.attempted
                    );
                    CollectionImport {
                        name: entry.collection.clone(),
                        status: ImportStatus::Success,
                        imported: imported.attempted,
                        inserted: imported.inserted,
                        failed: imported.failed,
                        error: None,
                        checksum_verified,
                    }
                }
                Err(e) => {
                    error!("❌ {}: {}", entry.collection, e);
                    CollectionImport::error(&entry.collection, e.to_string(), checksum_verified)
                }
            };
            results.push(result);

            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        let total_imported = results.iter().map(|r| r.imported).sum();
        let elapsed = started.elapsed();
        info!(
            "Restore into '{}' finished: {} document(s), {} error(s), {}",
            self.store.database_name(),
            total_imported,
            results
                .iter()
                .filter(|r| r.status == ImportStatus::Error)
                .count(),
            humantime::format_duration(std::time::Duration::from_millis(
                elapsed.as_millis() as u64
            ))
        );
        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!("✅ {} document(s) imported", total_imported));
        }

        Ok(RestoreReport {
            database: self.store.database_name().to_string(),
            collections: results,
            total_imported,
            elapsed_ms: elapsed.as_millis() as u64,
            manifest,
        })
    }

    /// Parses one entry and inserts its documents in batches.
    async fn import_entry(&self, entry: &ArchiveEntry) -> Result<Imported, ImportError> {
        let text = std::str::from_utf8(&entry.bytes)?;
        let documents = extjson::parse_documents(text)?;
        let mut imported = Imported::default();
        if documents.is_empty() {
            return Ok(imported);
        }

        let mut remaining = documents.into_iter();
        loop {
            let batch: Vec<Document> = remaining.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let size = batch.len() as u64;
            let outcome = self.store.insert_many(&entry.collection, batch).await?;
            debug!(
                "{}: batch of {} ({} inserted, {} rejected)",
                entry.collection, size, outcome.inserted, outcome.failed
            );
            imported.attempted += size;
            imported.inserted += outcome.inserted;
            imported.failed += outcome.failed;
        }
        Ok(imported)
    }
}
