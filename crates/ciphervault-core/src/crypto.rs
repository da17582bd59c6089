//! Authenticated cipher for entry bodies.
//!
//! AES-256-GCM with a fresh random 96-bit nonce drawn from `OsRng` on every
//! call. Callers never supply nonces, so nonce reuse under one key cannot
//! be expressed through this API.
//!
//! # Security model
//!
//! - Output is `ciphertext || tag (16 bytes)`; the nonce travels separately.
//! - No associated data.
//! - Every decryption failure collapses into
//!   [`CryptoError::AuthenticationFailure`]. No partial plaintext is ever
//!   returned.
//! - [`DerivedKey`] is zeroized on drop and cannot be read outside this crate.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Key length for AES-256-GCM.
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-256-GCM (96 bits).
pub const NONCE_LEN: usize = 12;

/// Authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// A 256-bit symmetric key derived from the vault password.
///
/// Deliberately not `Clone`: the session shares it behind an `Arc` so that
/// exactly one copy exists, and that copy is wiped when the last handle
/// drops.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn random() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Ciphertext plus the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// `ciphertext || tag`.
    pub ciphertext: Vec<u8>,
    /// The random nonce generated for this encryption.
    pub nonce: [u8; NONCE_LEN],
}

fn cipher(key: &DerivedKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Encrypt `plaintext` under `key` with a freshly generated nonce.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails (only
/// possible for inputs beyond the GCM length limit).
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<SealedPayload, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher(key)
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&nonce);
    Ok(SealedPayload {
        ciphertext,
        nonce: nonce_bytes,
    })
}

/// Decrypt a payload produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailure`] when the nonce is not 12
/// bytes, the ciphertext is shorter than a tag, or the tag does not verify.
pub fn decrypt(key: &DerivedKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AuthenticationFailure);
    }

    cipher(key)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}
