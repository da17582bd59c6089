//! On-disk blob store backed by redb.
//!
//! A single pure-Rust database file holds the whole vault. Every write is a
//! committed redb transaction, so a crash mid-save leaves the previous value
//! of the key intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::BlobOp;
use crate::{StorageBackend, StorageError};

const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// A storage backend backed by a redb database file.
///
/// Blocking redb calls are offloaded to the Tokio blocking thread pool.
///
/// # Examples
///
/// ```no_run
/// # use ciphervault_storage::RedbBackend;
/// let backend = RedbBackend::open("/home/me/.local/share/ciphervault.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create the vault file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if redb cannot open or create the
    /// file, or [`StorageError::Transaction`] if the blob table cannot be
    /// created in it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Create the table up front so read transactions never miss it.
        let txn = db.begin_write().map_err(transaction)?;
        txn.open_table(BLOBS).map_err(transaction)?;
        txn.commit().map_err(transaction)?;

        debug!(path = %path.display(), "redb blob store opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Filesystem path of the vault file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, op: BlobOp, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StorageError::Worker {
                op,
                reason: e.to_string(),
            })?
    }
}

fn transaction(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_owned();
        self.blocking(BlobOp::Get, move |db| {
            let fail = |e: &dyn std::fmt::Display| StorageError::backend(BlobOp::Get, &key, e);
            let txn = db.begin_read().map_err(transaction)?;
            let table = txn.open_table(BLOBS).map_err(|e| fail(&e))?;
            let value = table.get(key.as_str()).map_err(|e| fail(&e))?;
            Ok(value.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = key.to_owned();
        let value = value.to_vec();
        self.blocking(BlobOp::Put, move |db| {
            let txn = db.begin_write().map_err(transaction)?;
            {
                let mut table = txn
                    .open_table(BLOBS)
                    .map_err(|e| StorageError::backend(BlobOp::Put, &key, e))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(|e| StorageError::backend(BlobOp::Put, &key, e))?;
            }
            txn.commit().map_err(transaction)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        self.blocking(BlobOp::Delete, move |db| {
            let txn = db.begin_write().map_err(transaction)?;
            {
                let mut table = txn
                    .open_table(BLOBS)
                    .map_err(|e| StorageError::backend(BlobOp::Delete, &key, e))?;
                table
                    .remove(key.as_str())
                    .map_err(|e| StorageError::backend(BlobOp::Delete, &key, e))?;
            }
            txn.commit().map_err(transaction)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.to_owned();
        self.blocking(BlobOp::List, move |db| {
            let fail = |e: &dyn std::fmt::Display| StorageError::backend(BlobOp::List, &prefix, e);
            let txn = db.begin_read().map_err(transaction)?;
            let table = txn.open_table(BLOBS).map_err(|e| fail(&e))?;

            let mut keys = Vec::new();
            for item in table.range(prefix.as_str()..).map_err(|e| fail(&e))? {
                let (k, _) = item.map_err(|e| fail(&e))?;
                let key = k.value();
                if !key.starts_with(prefix.as_str()) {
                    break;
                }
                keys.push(key.to_owned());
            }
            Ok(keys)
        })
        .await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.blocking(BlobOp::Clear, |db| {
            let txn = db.begin_write().map_err(transaction)?;
            txn.delete_table(BLOBS)
                .map_err(|e| StorageError::backend(BlobOp::Clear, "", e))?;
            // Recreated empty in the same transaction.
            txn.open_table(BLOBS)
                .map_err(|e| StorageError::backend(BlobOp::Clear, "", e))?;
            txn.commit().map_err(transaction)
        })
        .await?;

        debug!(path = %self.path.display(), "redb blob store cleared");
        Ok(())
    }
}
