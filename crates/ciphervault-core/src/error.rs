//! Error types for `ciphervault-core`.
//!
//! Variants carry enough context to diagnose a failure without a debugger.
//! None of them ever carries key material, passwords, or plaintext.

use ciphervault_storage::StorageError;

/// Errors from password key derivation.
#[derive(Debug, thiserror::Error)]
pub enum KdfError {
    /// The salt has the wrong length or encoding.
    #[error("invalid salt: {reason}")]
    InvalidSalt { reason: String },

    /// The iteration count is below the brute-force floor.
    #[error("kdf iteration count {got} is below the minimum of {min}")]
    IterationsTooLow { min: u32, got: u32 },
}

/// Errors from the authenticated cipher.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// The tag did not verify. Wrong key, tampered ciphertext and a bad
    /// nonce all end up here without distinction.
    #[error("authentication failed")]
    AuthenticationFailure,
}

/// Errors from loading or serializing the entry store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The persisted blob is not a valid entry list.
    #[error("malformed entry blob: {reason}")]
    Malformed { reason: String },

    /// Two persisted entries share the same id.
    #[error("duplicate entry id {id}")]
    DuplicateId { id: String },

    /// Serializing the entry list failed.
    #[error("failed to serialize entries: {reason}")]
    Serialize { reason: String },
}

/// Errors surfaced by the vault session.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The setup password is shorter than the configured minimum.
    #[error("password must be at least {min_len} characters")]
    WeakPassword { min_len: usize },

    /// The setup password and its confirmation differ.
    #[error("passwords do not match")]
    PasswordMismatch,

    /// An entry operation or `lock` was attempted while the vault is not unlocked.
    #[error("vault is locked")]
    VaultLocked,

    /// The operation requires an initialized vault.
    #[error("no vault has been initialized")]
    NoVault,

    /// `initialize` was called on a vault that already exists.
    #[error("vault is already initialized")]
    AlreadyInitialized,

    /// `unlock` was called while already unlocked.
    #[error("vault is already unlocked")]
    AlreadyUnlocked,

    /// Decryption failed. The vault has been locked again; re-enter the password.
    #[error("authentication failed: wrong password or corrupted entry")]
    AuthenticationFailure,

    /// A persisted blob could not be parsed. Nothing is repaired automatically.
    #[error("storage corruption in '{key}': {reason}")]
    StorageCorruption { key: String, reason: String },

    /// Entries need a non-blank title.
    #[error("entry title must not be empty")]
    EmptyTitle,

    /// No entry exists with this id.
    #[error("entry not found: {id}")]
    EntryNotFound { id: String },

    /// The session changed state while this operation was in flight; its
    /// result was discarded.
    #[error("operation superseded by a newer vault transition")]
    Superseded,

    /// Key derivation was rejected.
    #[error("key derivation error: {0}")]
    Kdf(#[from] KdfError),

    /// Encryption of an entry body failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// Encoding a record for persistence failed.
    #[error("failed to serialize vault record: {reason}")]
    Serialization { reason: String },

    /// A background crypto task failed to complete.
    #[error("crypto worker failed: {reason}")]
    Worker { reason: String },

    /// The blob store returned an error.
    #[error("vault storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailure => Self::AuthenticationFailure,
            CryptoError::Encryption { reason } => Self::Encryption { reason },
        }
    }
}

impl VaultError {
    /// Whether the user can fix this by re-entering input (password, title).
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::WeakPassword { .. }
                | Self::PasswordMismatch
                | Self::AuthenticationFailure
                | Self::EmptyTitle
        )
    }
}
