//! Connection-scoped entry points.
//!
//! Each function opens its own store connection, runs one operation and closes
//! the connection on every exit path once the connection was established.

use std::io::Write;
use tracing::{info, warn};

use crate::decode::SnapshotDecoder;
use crate::encode::SnapshotEncoder;
use crate::error::SnapshotError;
use crate::inventory::list_collections;
use crate::store::{connect, DocumentStore};
use crate::types::{
    BackupOptions, BackupReport, CollectionSelection, ConnectionConfig, Inventory,
    RestoreOptions, RestoreReport,
};

async fn release(store: Box<dyn DocumentStore>) {
    if let Err(e) = store.close().await {
        warn!(
            "Failed to close connection to '{}': {}",
            store.database_name(),
            e
        );
    }
}

/// Lists collections and document counts of the configured database.
pub async fn inventory(config: &ConnectionConfig) -> Result<Inventory, SnapshotError> {
    let store = connect(config).await?;
    let result = list_collections(store.as_ref()).await;
    release(store).await;
    result
}

/// Backs up the selected collections of the configured database into an
/// archive written to `writer`.
///
/// An empty named selection fails before connecting. `CollectionSelection::All`
/// resolves to every collection of the database and fails if there are none.
///
/// # Example
///
/// ```no_run
/// use docsnap::{backup, BackupOptions, CollectionSelection, ConnectionConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConnectionConfig::default();
/// let file = std::fs::File::create("app.tar.gz")?;
/// let (report, _file) = backup(&config, &CollectionSelection::All, file, BackupOptions::default()).await?;
/// println!("{} documents", report.total_documents());
/// # Ok(())
/// # }
/// ```
pub async fn backup<W: Write>(
    config: &ConnectionConfig,
    selection: &CollectionSelection,
    writer: W,
    options: BackupOptions,
) -> Result<(BackupReport, W), SnapshotError> {
    if let CollectionSelection::Named(names) = selection {
        if names.is_empty() {
            return Err(SnapshotError::Config("no collections selected".to_string()));
        }
    }

    let store = connect(config).await?;
    let result = run_backup(store.as_ref(), selection, writer, options).await;
    release(store).await;
    result
}

async fn run_backup<W: Write>(
    store: &dyn DocumentStore,
    selection: &CollectionSelection,
    writer: W,
    options: BackupOptions,
) -> Result<(BackupReport, W), SnapshotError> {
    let names = match selection {
        CollectionSelection::Named(names) => names.clone(),
        CollectionSelection::All => {
            let mut names = store.list_collection_names().await?;
            names.sort();
            if names.is_empty() {
                return Err(SnapshotError::Config(format!(
                    "database '{}' has no collections",
                    store.database_name()
                )));
            }
            info!("Selected all {} collection(s)", names.len());
            names
        }
    };

    let mut encoder = SnapshotEncoder::new(store).with_mode(options.mode);
    if let Some(pb) = options.progress {
        encoder = encoder.with_progress(pb);
    }
    encoder.encode(&names, writer).await
}

/// Restores an archive into the configured database.
///
/// An empty archive fails before connecting.
pub async fn restore(
    config: &ConnectionConfig,
    archive: &[u8],
    options: RestoreOptions,
) -> Result<RestoreReport, SnapshotError> {
    if archive.is_empty() {
        return Err(SnapshotError::Archive("archive is empty".to_string()));
    }
    if options.batch_size == 0 {
        return Err(SnapshotError::Config(
            "batch size must be at least 1".to_string(),
        ));
    }

    let store = connect(config).await?;
    let mut decoder = SnapshotDecoder::new(store.as_ref()).with_batch_size(options.batch_size);
    if let Some(pb) = options.progress {
        decoder = decoder.with_progress(pb);
    }
    let result = decoder.decode(archive).await;
    drop(decoder);
    release(store).await;
    result
}
