//! Directory-backed document store.
//!
//! Layout: `<root>/<database>/<collection>.jsonl`, one canonical Extended JSON
//! document per line. Inserts append; `_id` uniqueness is enforced against an
//! in-memory key set loaded lazily per collection.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, warn};

use super::{ensure_id, identity_key, validate_name, DocumentStream, DocumentStore, InsertOutcome};
use crate::error::StoreError;
use crate::extjson;
use crate::value::Document;

const COLLECTION_EXTENSION: &str = "jsonl";

/// A store rooted at a directory on the local filesystem.
#[derive(Debug)]
pub struct DirStore {
    database: String,
    dir: PathBuf,
    ids: Mutex<HashMap<String, HashSet<String>>>,
    closed: AtomicBool,
}

impl DirStore {
    /// Opens `database` under `root`. The root directory must exist; the
    /// database directory is created on first insert.
    pub async fn open(root: &Path, database: &str) -> Result<Self, StoreError> {
        validate_name(database)?;
        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StoreError::Connection(format!(
                    "store root {} is not a directory",
                    root.display()
                )))
            }
            Err(e) => {
                return Err(StoreError::Connection(format!(
                    "store root {} is not accessible: {}",
                    root.display(),
                    e
                )))
            }
        }

        Ok(Self {
            database: database.to_string(),
            dir: root.join(database),
            ids: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", collection, COLLECTION_EXTENSION))
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Opens a collection file for line-by-line reading; `None` if it does not
    /// exist.
    async fn open_lines(
        &self,
        collection: &str,
    ) -> Result<Option<Lines<BufReader<tokio::fs::File>>>, StoreError> {
        match tokio::fs::File::open(self.collection_path(collection)).await {
            Ok(file) => Ok(Some(BufReader::new(file).lines())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the `_id` keys of a collection into the cache if absent.
    async fn load_ids(&self, collection: &str) -> Result<(), StoreError> {
        if self.lock_ids().contains_key(collection) {
            return Ok(());
        }

        let mut keys = HashSet::new();
        if let Some(mut lines) = self.open_lines(collection).await? {
            let mut line_no = 0usize;
            while let Some(line) = lines.next_line().await? {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let doc = parse_stored(collection, line_no, &line)?;
                if let Some(key) = identity_key(&doc) {
                    keys.insert(key);
                }
            }
        }

        self.lock_ids()
            .entry(collection.to_string())
            .or_insert(keys);
        Ok(())
    }

    fn lock_ids(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_stored(collection: &str, line: usize, text: &str) -> Result<Document, StoreError> {
    extjson::parse_line(text).map_err(|source| StoreError::Corrupt {
        collection: collection.to_string(),
        line,
        source,
    })
}

#[async_trait]
impl DocumentStore for DirStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.check_open()?;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(COLLECTION_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        self.check_open()?;
        validate_name(collection)?;
        let mut count = 0u64;
        if let Some(mut lines) = self.open_lines(collection).await? {
            while let Some(line) = lines.next_line().await? {
                if !line.trim().is_empty() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn find_all(&self, collection: &str) -> Result<DocumentStream, StoreError> {
        self.check_open()?;
        validate_name(collection)?;
        let Some(lines) = self.open_lines(collection).await? else {
            return Ok(stream::empty().boxed());
        };

        let name = collection.to_string();
        let documents = stream::unfold(Some((lines, 0usize)), move |state| {
            let name = name.clone();
            async move {
                let (mut lines, mut line_no) = state?;
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            line_no += 1;
                            if line.trim().is_empty() {
                                continue;
                            }
                            let item = parse_stored(&name, line_no, &line);
                            return Some((item, Some((lines, line_no))));
                        }
                        Ok(None) => return None,
                        // stop after the first read error
                        Err(e) => return Some((Err(StoreError::IoError(e)), None)),
                    }
                }
            }
        });
        Ok(documents.boxed())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, StoreError> {
        self.check_open()?;
        validate_name(collection)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        self.load_ids(collection).await?;

        let mut outcome = InsertOutcome::default();
        let mut buffer = String::new();
        {
            let mut cache = self.lock_ids();
            let seen = cache.entry(collection.to_string()).or_default();
            for mut doc in documents {
                ensure_id(&mut doc);
                let Some(key) = identity_key(&doc) else {
                    outcome.failed += 1;
                    continue;
                };
                if seen.contains(&key) {
                    debug!("Duplicate _id {} rejected in '{}'", key, collection);
                    outcome.failed += 1;
                    continue;
                }
                match extjson::to_line(&doc) {
                    Ok(line) => {
                        seen.insert(key);
                        buffer.push_str(&line);
                        buffer.push('\n');
                        outcome.inserted += 1;
                    }
                    Err(e) => {
                        warn!("Document rejected in '{}': {}", collection, e);
                        outcome.failed += 1;
                    }
                }
            }
        }

        if !buffer.is_empty() {
            if let Err(e) = self.append(collection, buffer.as_bytes()).await {
                // the key cache no longer matches the file
                self.lock_ids().remove(collection);
                return Err(e.into());
            }
        }
        Ok(outcome)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl DirStore {
    async fn append(&self, collection: &str, bytes: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.collection_path(collection))
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_data().await
    }
}
