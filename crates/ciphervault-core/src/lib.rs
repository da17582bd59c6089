//! Core library for `CipherVault`.
//!
//! Contains the password key derivation, the AES-256-GCM entry cipher, the
//! encrypted entry store, and the vault session state machine that gates
//! every access to plaintext. This crate depends on `ciphervault-storage`
//! for the blob store trait and knows nothing about how entries are shown.

pub mod config;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod kdf;
pub mod scanner;
pub mod session;

pub use config::VaultConfig;
pub use entry::{DecryptedEntry, EncryptedEntry, EntryId, EntryStore, EntrySummary};
pub use error::VaultError;
pub use scanner::ScanReport;
pub use session::{SaveOutcome, SessionStatus, VaultSession};
