//! Vault session: the lock/unlock lifecycle that gates plaintext.
//!
//! The flow is:
//!
//! 1. **Initialize** (`NoVault → Unlocked`): validate the new password,
//!    generate a salt, derive the key, persist salt + KDF parameters.
//!
//! 2. **Unlock** (`Locked → Unlocked`): derive a key from the stored salt
//!    and load the encrypted entries. There is no stored verifier; a wrong
//!    password is only noticed when the first entry fails to decrypt.
//!
//! 3. **Lock** (`Unlocked → Locked`): drop the key. Also happens on its own
//!    whenever a decrypt fails authentication.
//!
//! 4. **Wipe** (`any → NoVault`): clear the blob store.
//!
//! A vault whose salt or KDF record cannot be parsed still opens. It
//! reports `Locked`, refuses to unlock with [`VaultError::StorageCorruption`]
//! and can only be wiped.
//!
//! # Concurrency model
//!
//! Derivation, encryption and decryption run on the blocking pool with the
//! session lock released. Every state transition bumps a generation
//! counter; an in-flight operation re-checks it before committing and is
//! discarded with [`VaultError::Superseded`] if the session moved on. The
//! key lives behind an `Arc` held only by the `Unlocked` state and by
//! in-flight tasks, and is zeroized when the last handle drops.

use std::fmt;
use std::sync::Arc;

use ciphervault_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::crypto::{self, DerivedKey};
use crate::entry::{DecryptedEntry, EncryptedEntry, EntryId, EntryStore, EntrySummary};
use crate::error::{CryptoError, VaultError};
use crate::kdf::{self, DEFAULT_ITERATIONS, MIN_ITERATIONS, Salt};

/// Storage key for the base64 salt. Its presence marks an initialized vault.
pub const SALT_KEY: &str = "vault.salt";

/// Storage key for the encrypted entry list.
pub const ENTRIES_KEY: &str = "vault.entries";

/// Storage key for the KDF parameters fixed at creation.
pub const KDF_KEY: &str = "vault.kdf";

/// Persisted KDF parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct KdfParams {
    iterations: u32,
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    NoVault,
    Locked,
    Unlocked,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoVault => "no vault",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        })
    }
}

/// Result of a successful save.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// Id of the saved entry (new or existing).
    pub id: EntryId,
    /// Updated listing, newest first.
    pub entries: Vec<EntrySummary>,
}

/// Salt and iteration count of an initialized vault.
#[derive(Debug, Clone)]
struct VaultMetadata {
    salt: Salt,
    iterations: u32,
}

enum SessionState {
    NoVault,
    Locked(VaultMetadata),
    /// Metadata on disk is unreadable. Only wipe leaves this state.
    Corrupt {
        key: String,
        reason: String,
    },
    Unlocked {
        vault: VaultMetadata,
        key: Arc<DerivedKey>,
        entries: EntryStore,
    },
}

struct Inner {
    state: SessionState,
    generation: u64,
}

impl Inner {
    /// Replace the state, dropping whatever key the old state held.
    fn transition(&mut self, next: SessionState) {
        self.state = next;
        self.generation = self.generation.wrapping_add(1);
    }

    fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::NoVault => SessionStatus::NoVault,
            SessionState::Locked(_) | SessionState::Corrupt { .. } => SessionStatus::Locked,
            SessionState::Unlocked { .. } => SessionStatus::Unlocked,
        }
    }

    fn corruption(&self) -> Option<VaultError> {
        match &self.state {
            SessionState::Corrupt { key, reason } => Some(corruption(key, reason)),
            _ => None,
        }
    }
}

/// Key handle captured by an operation that runs outside the session lock.
struct Ticket {
    key: Arc<DerivedKey>,
    generation: u64,
}

/// One vault session over a blob store.
///
/// Sessions are independent objects; nothing is process-global.
pub struct VaultSession {
    storage: Arc<dyn StorageBackend>,
    config: VaultConfig,
    inner: RwLock<Inner>,
}

impl VaultSession {
    /// Open a session over `storage`.
    ///
    /// Starts in `Locked` if a salt is persisted, `NoVault` otherwise. A
    /// malformed salt or KDF record also opens as `Locked`, but only
    /// [`wipe`](Self::wipe) will work on it; see [`integrity`](Self::integrity).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Storage`] if the blob store fails.
    pub async fn open(
        storage: Arc<dyn StorageBackend>,
        config: VaultConfig,
    ) -> Result<Self, VaultError> {
        let state = match load_metadata(storage.as_ref()).await {
            Ok(Some(vault)) => SessionState::Locked(vault),
            Ok(None) => SessionState::NoVault,
            Err(VaultError::StorageCorruption { key, reason }) => {
                warn!(%key, %reason, "vault metadata is corrupt, only wipe is possible");
                SessionState::Corrupt { key, reason }
            }
            Err(err) => return Err(err),
        };
        let inner = Inner {
            state,
            generation: 0,
        };
        debug!(status = %inner.status(), "vault session opened");

        Ok(Self {
            storage,
            config,
            inner: RwLock::new(inner),
        })
    }

    /// Current lifecycle state.
    pub async fn status(&self) -> SessionStatus {
        self.inner.read().await.status()
    }

    /// Check that the persisted vault metadata was readable.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StorageCorruption`] naming the unreadable blob.
    pub async fn integrity(&self) -> Result<(), VaultError> {
        self.inner.read().await.corruption().map_or(Ok(()), Err)
    }

    /// The configuration this session was opened with.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Create a new vault and leave it unlocked.
    ///
    /// # Errors
    ///
    /// - [`VaultError::WeakPassword`] if the password is too short.
    /// - [`VaultError::PasswordMismatch`] if `confirm` differs.
    /// - [`VaultError::AlreadyInitialized`] unless the session is in `NoVault`.
    /// - [`VaultError::Superseded`] if a wipe raced the derivation.
    /// - [`VaultError::Storage`] if persisting fails.
    pub async fn initialize(&self, password: &str, confirm: &str) -> Result<(), VaultError> {
        self.check_new_password(password, confirm)?;

        let generation = {
            let inner = self.inner.read().await;
            if !matches!(inner.state, SessionState::NoVault) {
                return Err(VaultError::AlreadyInitialized);
            }
            inner.generation
        };

        let vault = VaultMetadata {
            salt: kdf::generate_salt(),
            iterations: self.config.kdf_iterations,
        };
        let key = derive_off_thread(password, &vault).await?;

        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            return Err(VaultError::Superseded);
        }

        let entries = EntryStore::new();
        self.persist(&entries).await?;
        let params = serde_json::to_vec(&KdfParams {
            iterations: vault.iterations,
        })
        .map_err(|e| VaultError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage.put(KDF_KEY, &params).await?;
        // Salt goes last: once it exists the vault counts as initialized.
        self.storage
            .put(SALT_KEY, vault.salt.to_base64().as_bytes())
            .await?;

        let iterations = vault.iterations;
        inner.transition(SessionState::Unlocked {
            vault,
            key: Arc::new(key),
            entries,
        });

        info!(iterations, "vault initialized");
        Ok(())
    }

    /// Unlock with `password`.
    ///
    /// Succeeds for any password; a wrong one surfaces as
    /// [`VaultError::AuthenticationFailure`] on the first [`read_entry`](Self::read_entry).
    ///
    /// # Errors
    ///
    /// - [`VaultError::NoVault`] / [`VaultError::AlreadyUnlocked`] from the wrong state.
    /// - [`VaultError::StorageCorruption`] if the vault metadata or the entry
    ///   blob is malformed; the session stays `Locked`.
    /// - [`VaultError::Superseded`] if another transition won the race.
    pub async fn unlock(&self, password: &str) -> Result<(), VaultError> {
        let (vault, generation) = self.begin_unlock().await?;
        let key = derive_off_thread(password, &vault).await?;
        self.finish_unlock(generation, vault, key).await
    }

    async fn begin_unlock(&self) -> Result<(VaultMetadata, u64), VaultError> {
        let inner = self.inner.read().await;
        match &inner.state {
            SessionState::NoVault => Err(VaultError::NoVault),
            SessionState::Unlocked { .. } => Err(VaultError::AlreadyUnlocked),
            SessionState::Corrupt { key, reason } => Err(corruption(key, reason)),
            SessionState::Locked(vault) => Ok((vault.clone(), inner.generation)),
        }
    }

    async fn finish_unlock(
        &self,
        generation: u64,
        vault: VaultMetadata,
        key: DerivedKey,
    ) -> Result<(), VaultError> {
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            return Err(VaultError::Superseded);
        }

        let entries = self.load_entries().await?;
        let count = entries.len();
        inner.transition(SessionState::Unlocked {
            vault,
            key: Arc::new(key),
            entries,
        });

        info!(entries = count, "vault unlocked");
        Ok(())
    }

    /// Lock the vault, dropping the key.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultLocked`] if already locked.
    /// - [`VaultError::NoVault`] if no vault exists.
    pub async fn lock(&self) -> Result<(), VaultError> {
        let mut inner = self.inner.write().await;
        let vault = match &inner.state {
            SessionState::Unlocked { vault, .. } => vault.clone(),
            SessionState::Locked(_) | SessionState::Corrupt { .. } => {
                return Err(VaultError::VaultLocked);
            }
            SessionState::NoVault => return Err(VaultError::NoVault),
        };
        inner.transition(SessionState::Locked(vault));

        info!("vault locked");
        Ok(())
    }

    /// Erase the salt and every entry. Valid from any state; irreversible.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Storage`] if the store cannot be cleared. The
    /// key is already gone by then and the session is left `Locked` (or
    /// still corrupt).
    pub async fn wipe(&self) -> Result<(), VaultError> {
        let mut inner = self.inner.write().await;

        // The key is dropped before storage is touched.
        if let SessionState::Unlocked { vault, .. } = &inner.state {
            let vault = vault.clone();
            inner.transition(SessionState::Locked(vault));
        }

        self.storage.clear().await?;
        inner.transition(SessionState::NoVault);

        info!("vault wiped");
        Ok(())
    }

    /// Encrypt and store an entry body.
    ///
    /// With `existing_id` the entry's ciphertext, nonce, title and timestamp
    /// are replaced wholesale; without it a new entry is created.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultLocked`] unless unlocked.
    /// - [`VaultError::EmptyTitle`] for a blank title.
    /// - [`VaultError::EntryNotFound`] if `existing_id` is unknown.
    /// - [`VaultError::Superseded`] if the vault was locked meanwhile.
    /// - [`VaultError::Storage`] if persisting fails; the in-memory store is
    ///   left unchanged.
    pub async fn save_entry(
        &self,
        title: &str,
        body: &str,
        existing_id: Option<EntryId>,
    ) -> Result<SaveOutcome, VaultError> {
        let ticket = self.begin_write(existing_id).await?;
        if title.trim().is_empty() {
            return Err(VaultError::EmptyTitle);
        }
        let record = seal_off_thread(&ticket.key, title, body, existing_id).await?;
        self.finish_save(ticket.generation, record, existing_id.is_some())
            .await
    }

    async fn begin_write(&self, existing_id: Option<EntryId>) -> Result<Ticket, VaultError> {
        let inner = self.inner.read().await;
        let SessionState::Unlocked { key, entries, .. } = &inner.state else {
            return Err(VaultError::VaultLocked);
        };
        if let Some(id) = existing_id.filter(|id| !entries.contains(id)) {
            return Err(VaultError::EntryNotFound { id: id.to_string() });
        }
        Ok(Ticket {
            key: Arc::clone(key),
            generation: inner.generation,
        })
    }

    /// Install a sealed record, provided the key it was sealed under is
    /// still the session's key.
    async fn finish_save(
        &self,
        generation: u64,
        record: EncryptedEntry,
        editing: bool,
    ) -> Result<SaveOutcome, VaultError> {
        let id = record.id;
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            return Err(VaultError::Superseded);
        }
        let SessionState::Unlocked { entries, .. } = &mut inner.state else {
            return Err(VaultError::Superseded);
        };
        // A concurrent delete may have removed the entry being edited.
        if editing && !entries.contains(&id) {
            return Err(VaultError::EntryNotFound { id: id.to_string() });
        }

        let previous = entries.upsert(record);
        let replaced = previous.is_some();
        if let Err(err) = self.persist(entries).await {
            match previous {
                Some(old) => {
                    entries.upsert(old);
                }
                None => {
                    entries.remove(&id);
                }
            }
            return Err(err);
        }

        info!(entry_id = %id, replaced, "entry saved");
        Ok(SaveOutcome {
            id,
            entries: entries.summaries(),
        })
    }

    /// Decrypt one entry.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultLocked`] unless unlocked.
    /// - [`VaultError::EntryNotFound`] for an unknown id.
    /// - [`VaultError::AuthenticationFailure`] if the tag does not verify.
    ///   The session is locked before this returns.
    /// - [`VaultError::Superseded`] if the session changed state while
    ///   decrypting; the plaintext is discarded.
    pub async fn read_entry(&self, id: &EntryId) -> Result<DecryptedEntry, VaultError> {
        let (record, ticket) = self.begin_read(id).await?;
        let opened = open_off_thread(&ticket.key, &record).await?;
        self.finish_read(ticket.generation, record, opened).await
    }

    async fn begin_read(&self, id: &EntryId) -> Result<(EncryptedEntry, Ticket), VaultError> {
        let inner = self.inner.read().await;
        let SessionState::Unlocked { key, entries, .. } = &inner.state else {
            return Err(VaultError::VaultLocked);
        };
        let record = entries
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::EntryNotFound { id: id.to_string() })?;
        let ticket = Ticket {
            key: Arc::clone(key),
            generation: inner.generation,
        };
        Ok((record, ticket))
    }

    /// Hand out the plaintext only if the session is still in the
    /// generation the decrypt started in.
    async fn finish_read(
        &self,
        generation: u64,
        record: EncryptedEntry,
        opened: Result<Zeroizing<Vec<u8>>, CryptoError>,
    ) -> Result<DecryptedEntry, VaultError> {
        let id = record.id;
        let plaintext = match opened {
            Ok(plaintext) => plaintext,
            Err(CryptoError::AuthenticationFailure) => {
                return Err(self.auto_lock(generation, &id).await);
            }
            Err(err) => return Err(err.into()),
        };

        if self.inner.read().await.generation != generation {
            return Err(VaultError::Superseded);
        }

        let body = std::str::from_utf8(&plaintext)
            .map_err(|_| corruption(ENTRIES_KEY, format!("entry {id} body is not valid UTF-8")))?
            .to_owned();
        debug!(entry_id = %id, "entry decrypted");
        Ok(DecryptedEntry::new(&record, body))
    }

    /// Delete an entry permanently.
    ///
    /// # Errors
    ///
    /// - [`VaultError::VaultLocked`] unless unlocked.
    /// - [`VaultError::EntryNotFound`] for an unknown id.
    /// - [`VaultError::Storage`] if persisting fails; the entry is kept.
    pub async fn delete_entry(&self, id: &EntryId) -> Result<Vec<EntrySummary>, VaultError> {
        let mut inner = self.inner.write().await;
        let SessionState::Unlocked { entries, .. } = &mut inner.state else {
            return Err(VaultError::VaultLocked);
        };
        let Some(removed) = entries.remove(id) else {
            return Err(VaultError::EntryNotFound { id: id.to_string() });
        };
        if let Err(err) = self.persist(entries).await {
            entries.upsert(removed);
            return Err(err);
        }

        info!(entry_id = %id, "entry deleted");
        Ok(entries.summaries())
    }

    /// List entry titles, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::VaultLocked`] unless unlocked.
    pub async fn list_entries(&self) -> Result<Vec<EntrySummary>, VaultError> {
        let inner = self.inner.read().await;
        match &inner.state {
            SessionState::Unlocked { entries, .. } => Ok(entries.summaries()),
            _ => Err(VaultError::VaultLocked),
        }
    }

    /// Relock after a failed decrypt and return the error to report.
    ///
    /// Only takes effect if the session is still in the generation the
    /// failing read started in, so one failure event locks at most once.
    /// If the session has since moved on to a different key the failure
    /// says nothing about it, and the read is reported as superseded.
    async fn auto_lock(&self, generation: u64, id: &EntryId) -> VaultError {
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            return match inner.state {
                SessionState::Locked(_) => VaultError::AuthenticationFailure,
                _ => VaultError::Superseded,
            };
        }
        let SessionState::Unlocked { vault, .. } = &inner.state else {
            return VaultError::Superseded;
        };
        let vault = vault.clone();
        inner.transition(SessionState::Locked(vault));

        warn!(entry_id = %id, "authentication failure, vault auto-locked");
        VaultError::AuthenticationFailure
    }

    fn check_new_password(&self, password: &str, confirm: &str) -> Result<(), VaultError> {
        let min_len = self.config.password_floor();
        if password.chars().count() < min_len {
            return Err(VaultError::WeakPassword { min_len });
        }
        if !bool::from(password.as_bytes().ct_eq(confirm.as_bytes())) {
            return Err(VaultError::PasswordMismatch);
        }
        Ok(())
    }

    async fn load_entries(&self) -> Result<EntryStore, VaultError> {
        match self.storage.get(ENTRIES_KEY).await? {
            None => Ok(EntryStore::new()),
            Some(blob) => EntryStore::load(&blob).map_err(|e| {
                warn!(error = %e, "entry blob failed to parse");
                corruption(ENTRIES_KEY, e)
            }),
        }
    }

    async fn persist(&self, entries: &EntryStore) -> Result<(), VaultError> {
        let blob = entries.serialize().map_err(|e| VaultError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage.put(ENTRIES_KEY, &blob).await?;
        Ok(())
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn load_metadata(storage: &dyn StorageBackend) -> Result<Option<VaultMetadata>, VaultError> {
    let Some(raw) = storage.get(SALT_KEY).await? else {
        return Ok(None);
    };
    let encoded = std::str::from_utf8(&raw).map_err(|e| corruption(SALT_KEY, e))?;
    let salt = Salt::from_base64(encoded).map_err(|e| corruption(SALT_KEY, e))?;

    let iterations = match storage.get(KDF_KEY).await? {
        None => DEFAULT_ITERATIONS,
        Some(raw) => {
            let params: KdfParams =
                serde_json::from_slice(&raw).map_err(|e| corruption(KDF_KEY, e))?;
            if params.iterations < MIN_ITERATIONS {
                return Err(corruption(
                    KDF_KEY,
                    format!("iteration count {} below floor", params.iterations),
                ));
            }
            params.iterations
        }
    };

    Ok(Some(VaultMetadata { salt, iterations }))
}

fn corruption(key: &str, reason: impl fmt::Display) -> VaultError {
    VaultError::StorageCorruption {
        key: key.to_owned(),
        reason: reason.to_string(),
    }
}

async fn derive_off_thread(password: &str, vault: &VaultMetadata) -> Result<DerivedKey, VaultError> {
    let password = Zeroizing::new(password.as_bytes().to_vec());
    let salt = vault.salt.clone();
    let iterations = vault.iterations;
    let key = run_blocking(move || kdf::derive_key(&password, &salt, iterations)).await??;
    Ok(key)
}

async fn seal_off_thread(
    key: &Arc<DerivedKey>,
    title: &str,
    body: &str,
    existing_id: Option<EntryId>,
) -> Result<EncryptedEntry, VaultError> {
    let plaintext = Zeroizing::new(body.as_bytes().to_vec());
    let key = Arc::clone(key);
    let sealed = run_blocking(move || crypto::encrypt(&key, &plaintext)).await??;
    Ok(EncryptedEntry {
        id: existing_id.unwrap_or_default(),
        title: title.to_owned(),
        ciphertext: sealed.ciphertext,
        nonce: sealed.nonce.to_vec(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

async fn open_off_thread(
    key: &Arc<DerivedKey>,
    record: &EncryptedEntry,
) -> Result<Result<Zeroizing<Vec<u8>>, CryptoError>, VaultError> {
    let key = Arc::clone(key);
    let ciphertext = record.ciphertext.clone();
    let nonce = record.nonce.clone();
    run_blocking(move || crypto::decrypt(&key, &ciphertext, &nonce).map(Zeroizing::new)).await
}

async fn run_blocking<T, F>(f: F) -> Result<T, VaultError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Worker {
            reason: e.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ciphervault_storage::{BlobOp, MemoryBackend, StorageError};

    use super::*;

    const PASSWORD: &str = "correctpassword123";

    async fn open(backend: &MemoryBackend) -> VaultSession {
        VaultSession::open(Arc::new(backend.clone()), VaultConfig::default())
            .await
            .unwrap()
    }

    async fn initialized() -> (MemoryBackend, VaultSession) {
        let backend = MemoryBackend::new();
        let session = open(&backend).await;
        session.initialize(PASSWORD, PASSWORD).await.unwrap();
        (backend, session)
    }

    async fn generation(session: &VaultSession) -> u64 {
        session.inner.read().await.generation
    }

    // ── initialize ───────────────────────────────────────────────────

    #[tokio::test]
    async fn fresh_storage_is_no_vault() {
        let session = open(&MemoryBackend::new()).await;
        assert_eq!(session.status().await, SessionStatus::NoVault);
    }

    #[tokio::test]
    async fn short_password_is_weak() {
        let backend = MemoryBackend::new();
        let session = open(&backend).await;

        let err = session.initialize("short", "short").await.unwrap_err();
        assert!(matches!(err, VaultError::WeakPassword { min_len: 12 }));
        assert_eq!(session.status().await, SessionStatus::NoVault);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn configured_floor_cannot_go_below_twelve() {
        let backend = MemoryBackend::new();
        let lax = VaultConfig {
            min_password_len: 3,
            ..VaultConfig::default()
        };
        let session = VaultSession::open(Arc::new(backend.clone()), lax)
            .await
            .unwrap();

        let err = session.initialize("short", "short").await.unwrap_err();
        assert!(matches!(err, VaultError::WeakPassword { min_len: 12 }));
        assert_eq!(session.status().await, SessionStatus::NoVault);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn mismatched_confirmation_rejected() {
        let backend = MemoryBackend::new();
        let session = open(&backend).await;

        let err = session
            .initialize("longenoughpassword1", "different")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::PasswordMismatch));
        assert_eq!(session.status().await, SessionStatus::NoVault);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn initialize_persists_salt_and_unlocks() {
        let (backend, session) = initialized().await;
        assert_eq!(session.status().await, SessionStatus::Unlocked);

        let raw = backend.get(SALT_KEY).await.unwrap().unwrap();
        let salt = Salt::from_base64(std::str::from_utf8(&raw).unwrap()).unwrap();
        assert_eq!(salt.as_bytes().len(), 16);

        let kdf: serde_json::Value =
            serde_json::from_slice(&backend.get(KDF_KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(kdf["iterations"], 100_000);
        assert_eq!(backend.get(ENTRIES_KEY).await.unwrap(), Some(b"[]".to_vec()));
    }

    #[tokio::test]
    async fn initialize_twice_rejected() {
        let (_backend, session) = initialized().await;
        let err = session.initialize(PASSWORD, PASSWORD).await.unwrap_err();
        assert!(matches!(err, VaultError::AlreadyInitialized));
    }

    // ── lock / unlock ────────────────────────────────────────────────

    #[tokio::test]
    async fn save_lock_unlock_read() {
        let (_backend, session) = initialized().await;
        let saved = session.save_entry("Title", "secret body", None).await.unwrap();

        session.lock().await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Locked);
        session.unlock(PASSWORD).await.unwrap();

        let entry = session.read_entry(&saved.id).await.unwrap();
        assert_eq!(entry.body(), "secret body");
        assert_eq!(entry.title(), "Title");
    }

    #[tokio::test]
    async fn wrong_password_auto_locks_on_read() {
        let (_backend, session) = initialized().await;
        let saved = session.save_entry("Title", "secret body", None).await.unwrap();
        session.lock().await.unwrap();

        // Unlock is optimistic.
        session.unlock("wrongpassword").await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Unlocked);

        let err = session.read_entry(&saved.id).await.unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationFailure));
        assert_eq!(session.status().await, SessionStatus::Locked);

        // Recoverable with the right password.
        session.unlock(PASSWORD).await.unwrap();
        assert_eq!(session.read_entry(&saved.id).await.unwrap().body(), "secret body");
    }

    #[tokio::test]
    async fn concurrent_failures_lock_once() {
        let (_backend, session) = initialized().await;
        let a = session.save_entry("a", "alpha", None).await.unwrap().id;
        let b = session.save_entry("b", "beta", None).await.unwrap().id;
        session.lock().await.unwrap();
        session.unlock("wrongpassword").await.unwrap();

        // Both decrypts are in flight before either failure is handled.
        let before = generation(&session).await;
        let (record_a, ticket_a) = session.begin_read(&a).await.unwrap();
        let (record_b, ticket_b) = session.begin_read(&b).await.unwrap();
        let opened_a = open_off_thread(&ticket_a.key, &record_a).await.unwrap();
        let opened_b = open_off_thread(&ticket_b.key, &record_b).await.unwrap();

        let ra = session.finish_read(ticket_a.generation, record_a, opened_a).await;
        let rb = session.finish_read(ticket_b.generation, record_b, opened_b).await;

        assert!(matches!(ra, Err(VaultError::AuthenticationFailure)));
        assert!(matches!(rb, Err(VaultError::AuthenticationFailure)));
        assert_eq!(generation(&session).await, before + 1);
        assert_eq!(session.status().await, SessionStatus::Locked);
    }

    #[tokio::test]
    async fn stale_auto_lock_is_ignored() {
        let (_backend, session) = initialized().await;
        let stale = generation(&session).await;
        session.lock().await.unwrap();
        session.unlock(PASSWORD).await.unwrap();

        let err = session.auto_lock(stale, &EntryId::new()).await;
        assert!(matches!(err, VaultError::Superseded));
        assert_eq!(session.status().await, SessionStatus::Unlocked);
    }

    #[tokio::test]
    async fn failure_under_old_key_does_not_blame_new_session() {
        let (_backend, session) = initialized().await;
        let id = session.save_entry("t", "body", None).await.unwrap().id;
        session.lock().await.unwrap();
        session.unlock("wrongpassword").await.unwrap();

        let (record, ticket) = session.begin_read(&id).await.unwrap();
        let opened = open_off_thread(&ticket.key, &record).await.unwrap();
        assert!(opened.is_err());

        // The user relocks and unlocks correctly before the failure lands.
        session.lock().await.unwrap();
        session.unlock(PASSWORD).await.unwrap();

        let err = session
            .finish_read(ticket.generation, record, opened)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Superseded));
        assert_eq!(session.status().await, SessionStatus::Unlocked);
        assert_eq!(session.read_entry(&id).await.unwrap().body(), "body");
    }

    #[tokio::test]
    async fn lock_from_wrong_state() {
        let session = open(&MemoryBackend::new()).await;
        assert!(matches!(session.lock().await, Err(VaultError::NoVault)));

        let (_backend, session) = initialized().await;
        session.lock().await.unwrap();
        assert!(matches!(session.lock().await, Err(VaultError::VaultLocked)));
    }

    #[tokio::test]
    async fn unlock_from_wrong_state() {
        let session = open(&MemoryBackend::new()).await;
        assert!(matches!(session.unlock(PASSWORD).await, Err(VaultError::NoVault)));

        let (_backend, session) = initialized().await;
        assert!(matches!(
            session.unlock(PASSWORD).await,
            Err(VaultError::AlreadyUnlocked)
        ));
    }

    #[tokio::test]
    async fn reopened_storage_starts_locked() {
        let (backend, session) = initialized().await;
        let id = session.save_entry("t", "persisted", None).await.unwrap().id;
        drop(session);

        let session = open(&backend).await;
        assert_eq!(session.status().await, SessionStatus::Locked);
        session.unlock(PASSWORD).await.unwrap();
        assert_eq!(session.read_entry(&id).await.unwrap().body(), "persisted");
    }

    #[tokio::test]
    async fn unlock_superseded_by_wipe() {
        let (_backend, session) = initialized().await;
        session.lock().await.unwrap();

        let (vault, started) = session.begin_unlock().await.unwrap();
        let key = derive_off_thread(PASSWORD, &vault).await.unwrap();
        session.wipe().await.unwrap();

        let err = session.finish_unlock(started, vault, key).await.unwrap_err();
        assert!(matches!(err, VaultError::Superseded));
        assert_eq!(session.status().await, SessionStatus::NoVault);
    }

    #[tokio::test]
    async fn read_superseded_by_lock_discards_plaintext() {
        let (_backend, session) = initialized().await;
        let id = session.save_entry("t", "body", None).await.unwrap().id;

        let (record, ticket) = session.begin_read(&id).await.unwrap();
        let opened = open_off_thread(&ticket.key, &record).await.unwrap();
        assert_eq!(opened.as_deref().unwrap(), b"body");
        session.lock().await.unwrap();

        let read = session.finish_read(ticket.generation, record, opened).await;
        assert!(matches!(read, Err(VaultError::Superseded)));
        assert_eq!(session.status().await, SessionStatus::Locked);
    }

    #[tokio::test]
    async fn save_sealed_under_previous_key_is_discarded() {
        let (backend, session) = initialized().await;

        let ticket = session.begin_write(None).await.unwrap();
        let record = seal_off_thread(&ticket.key, "t", "late body", None).await.unwrap();

        // Relocked and unlocked under another password meanwhile.
        session.lock().await.unwrap();
        session.unlock("someotherpassword").await.unwrap();

        let err = session
            .finish_save(ticket.generation, record, false)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Superseded));
        assert!(session.list_entries().await.unwrap().is_empty());
        assert_eq!(backend.get(ENTRIES_KEY).await.unwrap(), Some(b"[]".to_vec()));
    }

    #[tokio::test]
    async fn edit_loses_to_concurrent_delete() {
        let (backend, session) = initialized().await;
        let id = session.save_entry("t", "first", None).await.unwrap().id;

        let ticket = session.begin_write(Some(id)).await.unwrap();
        let record = seal_off_thread(&ticket.key, "t", "second", Some(id))
            .await
            .unwrap();
        session.delete_entry(&id).await.unwrap();

        let err = session
            .finish_save(ticket.generation, record, true)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::EntryNotFound { .. }));
        assert!(session.list_entries().await.unwrap().is_empty());
        let stored = EntryStore::load(&backend.get(ENTRIES_KEY).await.unwrap().unwrap()).unwrap();
        assert!(!stored.contains(&id));
    }

    // ── entries ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn entry_ops_require_unlocked() {
        let session = open(&MemoryBackend::new()).await;
        let id = EntryId::new();
        assert!(matches!(
            session.save_entry("t", "b", None).await,
            Err(VaultError::VaultLocked)
        ));
        assert!(matches!(session.read_entry(&id).await, Err(VaultError::VaultLocked)));

        let (_backend, session) = initialized().await;
        session.lock().await.unwrap();
        assert!(matches!(
            session.save_entry("t", "b", None).await,
            Err(VaultError::VaultLocked)
        ));
        assert!(matches!(session.read_entry(&id).await, Err(VaultError::VaultLocked)));
        assert!(matches!(session.delete_entry(&id).await, Err(VaultError::VaultLocked)));
        assert!(matches!(session.list_entries().await, Err(VaultError::VaultLocked)));
    }

    #[tokio::test]
    async fn edit_replaces_ciphertext_and_nonce() {
        let (backend, session) = initialized().await;
        let id = session.save_entry("draft", "first", None).await.unwrap().id;
        let before = EntryStore::load(&backend.get(ENTRIES_KEY).await.unwrap().unwrap()).unwrap();

        let outcome = session.save_entry("final", "second", Some(id)).await.unwrap();
        assert_eq!(outcome.id, id);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].title, "final");

        let after = EntryStore::load(&backend.get(ENTRIES_KEY).await.unwrap().unwrap()).unwrap();
        assert_ne!(before.get(&id).unwrap().nonce, after.get(&id).unwrap().nonce);
        assert_eq!(session.read_entry(&id).await.unwrap().body(), "second");
    }

    #[tokio::test]
    async fn save_unknown_existing_id_rejected() {
        let (_backend, session) = initialized().await;
        let err = session
            .save_entry("t", "b", Some(EntryId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::EntryNotFound { .. }));
        assert!(session.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_title_rejected() {
        let (_backend, session) = initialized().await;
        let err = session.save_entry("   ", "body", None).await.unwrap_err();
        assert!(matches!(err, VaultError::EmptyTitle));
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let (_backend, session) = initialized().await;
        session.save_entry("first", "1", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let last = session.save_entry("second", "2", None).await.unwrap();

        let titles: Vec<&str> = last.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn delete_entry_persists() {
        let (backend, session) = initialized().await;
        let keep = session.save_entry("keep", "k", None).await.unwrap().id;
        let gone = session.save_entry("gone", "g", None).await.unwrap().id;

        let remaining = session.delete_entry(&gone).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep);

        let stored = EntryStore::load(&backend.get(ENTRIES_KEY).await.unwrap().unwrap()).unwrap();
        assert!(!stored.contains(&gone));
        assert!(matches!(
            session.read_entry(&gone).await,
            Err(VaultError::EntryNotFound { .. })
        ));
        assert!(matches!(
            session.delete_entry(&gone).await,
            Err(VaultError::EntryNotFound { .. })
        ));
    }

    /// Memory store whose writes can be switched off.
    #[derive(Default)]
    struct Flaky {
        inner: MemoryBackend,
        refuse_puts: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl StorageBackend for Flaky {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            if self.refuse_puts.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StorageError::Backend {
                    op: BlobOp::Put,
                    target: key.to_owned(),
                    reason: "disk full".to_owned(),
                });
            }
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list(prefix).await
        }
    }

    #[tokio::test]
    async fn failed_persist_leaves_entries_unchanged() {
        let flaky = Arc::new(Flaky::default());
        let storage: Arc<dyn StorageBackend> = flaky.clone();
        let session = VaultSession::open(storage, VaultConfig::default())
            .await
            .unwrap();
        session.initialize(PASSWORD, PASSWORD).await.unwrap();
        let kept = session.save_entry("kept", "original", None).await.unwrap().id;

        flaky.refuse_puts.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            session.save_entry("new", "n", None).await,
            Err(VaultError::Storage(_))
        ));
        assert!(matches!(
            session.save_entry("kept", "changed", Some(kept)).await,
            Err(VaultError::Storage(_))
        ));
        assert!(matches!(
            session.delete_entry(&kept).await,
            Err(VaultError::Storage(_))
        ));

        let listed = session.list_entries().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept);
        assert_eq!(session.read_entry(&kept).await.unwrap().body(), "original");
    }

    #[tokio::test]
    async fn concurrent_saves_both_land() {
        let (backend, session) = initialized().await;
        let (a, b) = tokio::join!(
            session.save_entry("a", "alpha", None),
            session.save_entry("b", "beta", None)
        );
        let (a, b) = (a.unwrap().id, b.unwrap().id);

        assert_eq!(session.list_entries().await.unwrap().len(), 2);
        let stored = EntryStore::load(&backend.get(ENTRIES_KEY).await.unwrap().unwrap()).unwrap();
        assert!(stored.contains(&a) && stored.contains(&b));
    }

    #[tokio::test]
    async fn titles_stay_plaintext_bodies_do_not() {
        let (backend, session) = initialized().await;
        session.save_entry("Visible title", "hidden body", None).await.unwrap();

        let raw = String::from_utf8(backend.get(ENTRIES_KEY).await.unwrap().unwrap()).unwrap();
        assert!(raw.contains("Visible title"));
        assert!(!raw.contains("hidden body"));
    }

    // ── wipe ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn wipe_from_every_state() {
        // Unlocked
        let (backend, session) = initialized().await;
        session.save_entry("t", "b", None).await.unwrap();
        session.wipe().await.unwrap();
        assert_eq!(session.status().await, SessionStatus::NoVault);
        assert!(backend.is_empty().await);

        // Locked
        let (backend, session) = initialized().await;
        session.lock().await.unwrap();
        session.wipe().await.unwrap();
        assert_eq!(session.status().await, SessionStatus::NoVault);
        assert!(backend.is_empty().await);

        // NoVault
        session.wipe().await.unwrap();
        assert_eq!(session.status().await, SessionStatus::NoVault);

        // A fresh vault can be created afterwards.
        session.initialize(PASSWORD, PASSWORD).await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Unlocked);
    }

    // ── corruption ───────────────────────────────────────────────────

    #[tokio::test]
    async fn malformed_salt_opens_locked_and_refuses_unlock() {
        let backend = MemoryBackend::new();
        backend.put(SALT_KEY, b"@@not-base64@@").await.unwrap();
        backend.put(ENTRIES_KEY, b"[]").await.unwrap();
        let session = open(&backend).await;

        assert_eq!(session.status().await, SessionStatus::Locked);
        let err = session.integrity().await.unwrap_err();
        assert!(matches!(err, VaultError::StorageCorruption { ref key, .. } if key == SALT_KEY));
        let err = session.unlock(PASSWORD).await.unwrap_err();
        assert!(matches!(err, VaultError::StorageCorruption { ref key, .. } if key == SALT_KEY));
        assert!(matches!(session.lock().await, Err(VaultError::VaultLocked)));
        assert!(matches!(
            session.initialize(PASSWORD, PASSWORD).await,
            Err(VaultError::AlreadyInitialized)
        ));
        assert!(matches!(session.list_entries().await, Err(VaultError::VaultLocked)));
    }

    #[tokio::test]
    async fn corrupt_vault_can_be_wiped_and_recreated() {
        let backend = MemoryBackend::new();
        backend.put(SALT_KEY, b"@@not-base64@@").await.unwrap();
        backend.put(ENTRIES_KEY, b"[]").await.unwrap();
        let session = open(&backend).await;

        session.wipe().await.unwrap();
        assert!(backend.is_empty().await);
        assert_eq!(session.status().await, SessionStatus::NoVault);
        session.integrity().await.unwrap();

        session.initialize(PASSWORD, PASSWORD).await.unwrap();
        assert_eq!(session.status().await, SessionStatus::Unlocked);
    }

    #[tokio::test]
    async fn low_persisted_iterations_is_corruption() {
        let backend = MemoryBackend::new();
        backend
            .put(SALT_KEY, Salt::generate().to_base64().as_bytes())
            .await
            .unwrap();
        backend.put(KDF_KEY, br#"{"iterations":10}"#).await.unwrap();
        let session = open(&backend).await;

        let err = session.unlock(PASSWORD).await.unwrap_err();
        assert!(matches!(err, VaultError::StorageCorruption { ref key, .. } if key == KDF_KEY));
        assert_eq!(session.status().await, SessionStatus::Locked);
    }

    #[tokio::test]
    async fn missing_kdf_record_uses_default() {
        let (backend, session) = initialized().await;
        let id = session.save_entry("t", "legacy", None).await.unwrap().id;
        backend.delete(KDF_KEY).await.unwrap();

        let session = open(&backend).await;
        session.unlock(PASSWORD).await.unwrap();
        assert_eq!(session.read_entry(&id).await.unwrap().body(), "legacy");
    }

    #[tokio::test]
    async fn corrupt_entries_keep_vault_locked() {
        let (backend, session) = initialized().await;
        session.lock().await.unwrap();
        backend.put(ENTRIES_KEY, b"{garbage").await.unwrap();

        let err = session.unlock(PASSWORD).await.unwrap_err();
        assert!(matches!(err, VaultError::StorageCorruption { ref key, .. } if key == ENTRIES_KEY));
        assert_eq!(session.status().await, SessionStatus::Locked);
    }

    #[test]
    fn session_debug_does_not_leak() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let session = rt.block_on(open(&MemoryBackend::new()));
        let debug = format!("{session:?}");
        assert!(debug.contains("VaultSession"));
        assert!(!debug.contains("key"));
    }
}
