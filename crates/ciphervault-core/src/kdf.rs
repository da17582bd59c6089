//! Password key derivation.
//!
//! PBKDF2-HMAC-SHA256 stretches the vault password with a per-vault random
//! salt into a 32-byte [`DerivedKey`]. The iteration count is fixed when the
//! vault is created and persisted next to the salt; derivation is fully
//! deterministic for a given password, salt and count.

use std::fmt;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::crypto::{DerivedKey, KEY_LEN};
use crate::error::KdfError;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Lowest iteration count accepted by [`derive_key`].
pub const MIN_ITERATIONS: u32 = 100_000;

/// Iteration count used for new vaults and for vaults created before the
/// count was persisted.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Random, non-secret per-vault salt.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Draw a fresh salt from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build a salt from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KdfError::InvalidSalt`] unless exactly 16 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KdfError> {
        let array: [u8; SALT_LEN] = bytes.try_into().map_err(|_| KdfError::InvalidSalt {
            reason: format!("expected {SALT_LEN} bytes, got {}", bytes.len()),
        })?;
        Ok(Self(array))
    }

    /// Parse the base64 form stored under `vault.salt`.
    ///
    /// # Errors
    ///
    /// Returns [`KdfError::InvalidSalt`] on bad base64 or wrong length.
    pub fn from_base64(encoded: &str) -> Result<Self, KdfError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| KdfError::InvalidSalt {
                reason: format!("base64 decode failed: {e}"),
            })?;
        Self::from_bytes(&bytes)
    }

    /// Base64 form for persistence.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Borrow the raw salt bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Salt").field(&self.to_base64()).finish()
    }
}

/// Generate a salt for a new vault.
#[must_use]
pub fn generate_salt() -> Salt {
    Salt::generate()
}

/// Derive the vault key from a password.
///
/// Any byte string is a valid password. The CPU cost is the point; do not
/// call this on an async worker thread.
///
/// # Errors
///
/// Returns [`KdfError::IterationsTooLow`] if `iterations` is below
/// [`MIN_ITERATIONS`].
pub fn derive_key(password: &[u8], salt: &Salt, iterations: u32) -> Result<DerivedKey, KdfError> {
    if iterations < MIN_ITERATIONS {
        return Err(KdfError::IterationsTooLow {
            min: MIN_ITERATIONS,
            got: iterations,
        });
    }

    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt.as_bytes(), iterations, &mut out);
    let key = DerivedKey::from_bytes(out);
    out.zeroize();
    Ok(key)
}
