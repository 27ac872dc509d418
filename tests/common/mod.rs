//! Shared helpers for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use docsnap::store::DocumentStream;
use docsnap::{Document, DocumentStore, InsertOutcome, MemoryStore, ObjectId, StoreError, Value};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::sync::Mutex;

/// Wraps a [`MemoryStore`], failing reads or counts of chosen collections and
/// recording every insert batch.
pub struct FlakyStore {
    inner: MemoryStore,
    failing_reads: HashSet<String>,
    failing_counts: HashSet<String>,
    batches: Mutex<Vec<(String, usize)>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing_reads: HashSet::new(),
            failing_counts: HashSet::new(),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_reads(mut self, collection: &str) -> Self {
        self.failing_reads.insert(collection.to_string());
        self
    }

    pub fn fail_counts(mut self, collection: &str) -> Self {
        self.failing_counts.insert(collection.to_string());
        self
    }

    pub fn batch_sizes(&self, collection: &str) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == collection)
            .map(|(_, size)| *size)
            .collect()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn database_name(&self) -> &str {
        self.inner.database_name()
    }

    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_collection_names().await
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        if self.failing_counts.contains(collection) {
            return Err(StoreError::IoError(io::Error::other("count timed out")));
        }
        self.inner.count_documents(collection).await
    }

    async fn find_all(&self, collection: &str) -> Result<DocumentStream, StoreError> {
        if !self.failing_reads.contains(collection) {
            return self.inner.find_all(collection).await;
        }
        // the cursor dies after the first document
        let first = self.inner.documents(collection).into_iter().take(1).map(Ok);
        let failure = std::iter::once(Err(StoreError::IoError(io::Error::other(
            "cursor killed",
        ))));
        Ok(stream::iter(first.chain(failure)).boxed())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, StoreError> {
        self.batches
            .lock()
            .unwrap()
            .push((collection.to_string(), documents.len()));
        self.inner.insert_many(collection, documents).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

/// A document with a deterministic identifier derived from `n`.
pub fn numbered(n: u32) -> Document {
    let mut bytes = [0u8; 12];
    bytes[8..].copy_from_slice(&n.to_be_bytes());
    let mut doc = Document::new();
    doc.insert("_id", ObjectId::from_bytes(bytes));
    doc.insert("n", Value::from(n as i32));
    doc
}

/// Seeds a store collection, creating it even when `docs` is empty.
pub async fn seed(store: &MemoryStore, collection: &str, docs: Vec<Document>) {
    store.create_collection(collection);
    if !docs.is_empty() {
        store.insert_many(collection, docs).await.unwrap();
    }
}

/// Entry names of a gzip-compressed tar archive, in archive order.
pub fn entry_names(archive: &[u8]) -> Vec<String> {
    read_entries(archive).into_iter().map(|(name, _)| name).collect()
}

/// Entries of a gzip-compressed tar archive as (name, text) pairs.
pub fn read_entries(archive: &[u8]) -> Vec<(String, String)> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    tar.entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut text = String::new();
            entry.read_to_string(&mut text).unwrap();
            (name, text)
        })
        .collect()
}

/// Builds a gzip-compressed tar archive from (name, text) pairs.
pub fn build_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    let mut gz = builder.into_inner().unwrap();
    gz.flush().unwrap();
    gz.finish().unwrap()
}
