//! In-memory document store.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{ensure_id, identity_key, validate_name, DocumentStream, DocumentStore, InsertOutcome};
use crate::error::StoreError;
use crate::value::Document;

/// A process-local store. Collections are created on first insert or with
/// [`MemoryStore::create_collection`].
#[derive(Debug)]
pub struct MemoryStore {
    database: String,
    collections: Mutex<BTreeMap<String, Vec<Document>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty database.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates an empty collection if it does not exist yet.
    pub fn create_collection(&self, name: &str) {
        self.lock().entry(name.to_string()).or_default();
    }

    /// Snapshot of a collection's documents in insertion order.
    pub fn documents(&self, name: &str) -> Vec<Document> {
        self.lock().get(name).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<Document>>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.check_open()?;
        Ok(self.lock().keys().cloned().collect())
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        self.check_open()?;
        Ok(self.lock().get(collection).map_or(0, |docs| docs.len() as u64))
    }

    async fn find_all(&self, collection: &str) -> Result<DocumentStream, StoreError> {
        self.check_open()?;
        let docs = self.documents(collection);
        Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, StoreError> {
        self.check_open()?;
        validate_name(collection)?;

        let mut collections = self.lock();
        let stored = collections.entry(collection.to_string()).or_default();
        let mut seen: HashSet<String> = stored.iter().filter_map(identity_key).collect();

        let mut outcome = InsertOutcome::default();
        for mut doc in documents {
            ensure_id(&mut doc);
            let fresh = identity_key(&doc).map(|key| seen.insert(key));
            if fresh == Some(true) {
                stored.push(doc);
                outcome.inserted += 1;
            } else {
                debug!("Duplicate _id rejected in '{}'", collection);
                outcome.failed += 1;
            }
        }
        Ok(outcome)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectId;
    use futures_util::TryStreamExt;

    fn doc_with_id(hex: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("_id", ObjectId::parse_hex(hex).unwrap());
        doc
    }

    #[tokio::test]
    async fn test_unordered_insert_isolates_duplicates() {
        let store = MemoryStore::new("app");
        let a = doc_with_id("000000000000000000000001");
        let b = doc_with_id("000000000000000000000002");

        let first = store
            .insert_many("users", vec![a.clone(), b.clone()])
            .await
            .unwrap();
        assert_eq!(first, InsertOutcome { inserted: 2, failed: 0 });

        let c = doc_with_id("000000000000000000000003");
        let second = store
            .insert_many("users", vec![a, c, b])
            .await
            .unwrap();
        assert_eq!(second, InsertOutcome { inserted: 1, failed: 2 });
        assert_eq!(store.count_documents("users").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_find_all_streams_in_insertion_order() {
        let store = MemoryStore::new("app");
        let docs = vec![
            doc_with_id("000000000000000000000002"),
            doc_with_id("000000000000000000000001"),
        ];
        store.insert_many("c", docs.clone()).await.unwrap();
        let found: Vec<Document> = store.find_all("c").await.unwrap().try_collect().await.unwrap();
        assert_eq!(found, docs);
        assert!(store
            .find_all("missing")
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryStore::new("app");
        store.create_collection("logs");
        assert_eq!(store.list_collection_names().await.unwrap(), vec!["logs"]);
        store.close().await.unwrap();
        assert!(matches!(
            store.list_collection_names().await,
            Err(StoreError::Closed)
        ));
    }
}
