//! Blob store abstraction for `CipherVault`.
//!
//! The vault persists exactly three blobs: the base64 salt, the KDF
//! parameters and the JSON array of already-encrypted entries. This crate
//! stores them as opaque bytes under short string keys and knows nothing
//! about what they mean.
//!
//! Backends:
//!
//! - [`RedbBackend`]: single redb file on disk (feature `redb-backend`, on by default)
//! - [`MemoryBackend`]: process-local map for tests and throwaway sessions

mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::{BlobOp, StorageError};
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// A key-value blob store shared by the vault session across tasks.
///
/// Values are last-write-wins per key. Nothing spans keys atomically; the
/// session orders its writes so that a partial sequence is still readable.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Fetch a blob. `Ok(None)` if the key was never written or was deleted.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a blob, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove a blob. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Whether a blob exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove every blob. Used by vault wipe.
    ///
    /// The default lists everything and deletes key by key; backends with
    /// a bulk primitive override it.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backend fails.
    async fn clear(&self) -> Result<(), StorageError> {
        for key in self.list("").await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}
