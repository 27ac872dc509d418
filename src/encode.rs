//! Snapshot encoder: streams collections into a compressed archive.

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::TryStreamExt;
use indicatif::ProgressBar;
use std::collections::HashSet;
use std::io::{self, Write};
use std::time::Instant;
use tar::{Builder, EntryType, Header};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{SnapshotError, StoreError};
use crate::extjson::{self, ExtJsonMode};
use crate::metadata::{
    data_entry_name, error_entry_name, Manifest, ManifestCollection, ManifestFailure,
    ERROR_MARKER, MANIFEST_ENTRY,
};
use crate::store::{validate_name, DocumentStore};
use crate::types::{BackupReport, BackupStatus, CollectionBackup};
use crate::value::Document;
use crate::verify::entry_md5;

/// Failure while capturing a single collection. Recorded as an error marker.
#[derive(Error, Debug)]
enum CaptureError {
    #[error("read failed: {0}")]
    Read(#[from] StoreError),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("name is reserved for archive metadata ('{0}')")]
    ReservedName(&'static str),
}

struct Captured {
    text: String,
    documents: u64,
}

/// Writes selected collections of a store into a gzip-compressed tar archive.
///
/// # Example
///
/// ```no_run
/// use docsnap::{MemoryStore, SnapshotEncoder};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new("app");
/// let (report, archive) = SnapshotEncoder::new(&store)
///     .encode(&["users".to_string()], Vec::new())
///     .await?;
/// println!("{} documents, {} bytes", report.total_documents(), archive.len());
/// # Ok(())
/// # }
/// ```
pub struct SnapshotEncoder<'a> {
    store: &'a dyn DocumentStore,
    mode: ExtJsonMode,
    progress: Option<ProgressBar>,
}

impl<'a> SnapshotEncoder<'a> {
    /// Creates an encoder writing canonical Extended JSON.
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            mode: ExtJsonMode::Canonical,
            progress: None,
        }
    }

    /// Selects the Extended JSON flavour.
    pub fn with_mode(mut self, mode: ExtJsonMode) -> Self {
        self.mode = mode;
        self
    }

    /// Reports per-collection progress on `pb`.
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    /// Encodes `selected` collections, in order, into an archive written to
    /// `writer`.
    ///
    /// A collection that cannot be read or serialized becomes a
    /// `<name>_ERROR.json` entry and the run continues. The manifest is always
    /// appended last and the archive is always finalized.
    ///
    /// # Returns
    ///
    /// The backup report and the writer, flushed, after the gzip trailer.
    ///
    /// # Errors
    ///
    /// `SnapshotError::Config` for an empty selection or an unusable name
    /// (checked before anything is written); `SnapshotError::IoError` if the
    /// writer fails.
    pub async fn encode<W: Write>(
        &self,
        selected: &[String],
        writer: W,
    ) -> Result<(BackupReport, W), SnapshotError> {
        let names = normalize_selection(selected)?;
        let created_at = Utc::now();
        let started = Instant::now();
        let mtime = created_at.timestamp().max(0) as u64;

        info!(
            "Backing up {} collection(s) from '{}'",
            names.len(),
            self.store.database_name()
        );
        if let Some(pb) = &self.progress {
            pb.set_length(names.len() as u64);
        }

        let mut builder = Builder::new(GzEncoder::new(writer, Compression::best()));
        let mut results = Vec::with_capacity(names.len());
        let mut captured = Vec::new();
        let mut failed = Vec::new();

        for name in &names {
            if let Some(pb) = &self.progress {
                pb.set_message(format!("📦 {}", name));
            }
            let collection_started = Instant::now();

            match self.capture(name).await {
                Ok(Captured { text, documents }) => {
                    let entry = data_entry_name(name);
                    append_entry(&mut builder, &entry, text.as_bytes(), mtime)?;
                    info!("✅ {}: {} document(s)", name, documents);
                    captured.push(ManifestCollection {
                        name: name.clone(),
                        documents,
                        md5: Some(entry_md5(text.as_bytes())),
                        elapsed_ms: collection_started.elapsed().as_millis() as u64,
                    });
                    results.push(CollectionBackup {
                        name: name.clone(),
                        status: BackupStatus::Success,
                        documents,
                        entry,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("❌ {}: {}", name, e);
                    let entry = error_entry_name(name);
                    let marker = serde_json::to_vec_pretty(&serde_json::json!({
                        "collection": name,
                        "error": e.to_string(),
                    }))?;
                    append_entry(&mut builder, &entry, &marker, mtime)?;
                    failed.push(ManifestFailure {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                    results.push(CollectionBackup {
                        name: name.clone(),
                        status: BackupStatus::Error,
                        documents: 0,
                        entry,
                        error: Some(e.to_string()),
                    });
                }
            }

            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        let manifest = Manifest::new(
            self.store.database_name(),
            created_at,
            self.mode.format_tag(),
            captured,
            failed,
            started.elapsed(),
        );
        append_entry(
            &mut builder,
            MANIFEST_ENTRY,
            manifest.to_json()?.as_bytes(),
            mtime,
        )?;

        let mut writer = builder.into_inner()?.finish()?;
        writer.flush()?;

        info!(
            "Backup of '{}' finished: {} document(s) in {} collection(s), {} failed, {}",
            manifest.database,
            manifest.total_documents,
            manifest.collections_succeeded,
            manifest.failed.len(),
            manifest.elapsed
        );
        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!(
                "✅ {} document(s) archived",
                manifest.total_documents
            ));
        }

        Ok((
            BackupReport {
                collections: results,
                manifest,
            },
            writer,
        ))
    }

    /// Reads and serializes one collection.
    async fn capture(&self, name: &str) -> Result<Captured, CaptureError> {
        // such entries would be dropped or misread on restore
        if data_entry_name(name) == MANIFEST_ENTRY {
            return Err(CaptureError::ReservedName(MANIFEST_ENTRY));
        }
        if name.contains(ERROR_MARKER) {
            return Err(CaptureError::ReservedName(ERROR_MARKER));
        }
        let documents: Vec<Document> = self.store.find_all(name).await?.try_collect().await?;
        let text = extjson::to_pretty_string(&documents, self.mode)?;
        Ok(Captured {
            text,
            documents: documents.len() as u64,
        })
    }
}

/// Validates the selection and drops repeated names, keeping the first
/// occurrence.
fn normalize_selection(selected: &[String]) -> Result<Vec<String>, SnapshotError> {
    if selected.is_empty() {
        return Err(SnapshotError::Config("no collections selected".to_string()));
    }

    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(selected.len());
    for name in selected {
        validate_name(name)
            .map_err(|_| SnapshotError::Config(format!("invalid collection name '{}'", name)))?;
        if seen.insert(name.as_str()) {
            names.push(name.clone());
        } else {
            warn!("Collection '{}' selected more than once", name);
        }
    }
    Ok(names)
}

fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    name: &str,
    data: &[u8],
    mtime: u64,
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    builder.append_data(&mut header, name, data)
}
