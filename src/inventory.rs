//! Collection inventory.

use tracing::{info, warn};

use crate::error::SnapshotError;
use crate::store::DocumentStore;
use crate::types::{CollectionInfo, CountStatus, Inventory};

/// Lists the collections of a store with their document counts.
///
/// A failing count query does not abort the listing: the collection is
/// reported with a count of 0, `CountStatus::CountUnavailable` and the reason.
/// Only a failure to list collection names fails the call.
pub async fn list_collections(store: &dyn DocumentStore) -> Result<Inventory, SnapshotError> {
    let mut names = store.list_collection_names().await?;
    names.sort();

    let mut collections = Vec::with_capacity(names.len());
    for name in names {
        let info = match store.count_documents(&name).await {
            Ok(count) => CollectionInfo {
                name,
                count,
                status: CountStatus::Ok,
                reason: None,
            },
            Err(e) => {
                warn!("Count unavailable for '{}': {}", name, e);
                CollectionInfo {
                    name,
                    count: 0,
                    status: CountStatus::CountUnavailable,
                    reason: Some(e.to_string()),
                }
            }
        };
        collections.push(info);
    }

    let total_documents = collections
        .iter()
        .filter(|c| c.status == CountStatus::Ok)
        .map(|c| c.count)
        .sum();
    info!(
        "Database '{}': {} collection(s), {} document(s)",
        store.database_name(),
        collections.len(),
        total_documents
    );

    Ok(Inventory {
        database: store.database_name().to_string(),
        total_collections: collections.len(),
        total_documents,
        collections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::value::Document;

    #[tokio::test]
    async fn test_inventory_counts_and_totals() {
        let store = MemoryStore::new("app");
        store.create_collection("logs");
        store
            .insert_many("users", vec![Document::new(), Document::new()])
            .await
            .unwrap();

        let inventory = list_collections(&store).await.unwrap();
        assert_eq!(inventory.total_collections, 2);
        assert_eq!(inventory.total_documents, 2);
        assert_eq!(inventory.collections[0].name, "logs");
        assert_eq!(inventory.collections[0].count, 0);
        assert_eq!(inventory.collections[1].count, 2);
        assert!(inventory
            .collections
            .iter()
            .all(|c| c.status == CountStatus::Ok));
    }

    #[tokio::test]
    async fn test_inventory_is_idempotent() {
        let store = MemoryStore::new("app");
        store
            .insert_many("users", vec![Document::new()])
            .await
            .unwrap();
        let first = list_collections(&store).await.unwrap();
        let second = list_collections(&store).await.unwrap();
        assert_eq!(first, second);
    }
}
