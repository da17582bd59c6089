//! Vault configuration.
//!
//! Loads tunables from `CIPHERVAULT_*` environment variables with defaults.
//! The KDF iteration count only applies to vaults created with it; an
//! existing vault always derives with the count persisted at creation.

use tracing::warn;

use crate::kdf::{DEFAULT_ITERATIONS, MIN_ITERATIONS};

/// Minimum setup password length, in characters.
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 12;

/// Vault session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// PBKDF2 iteration count for newly created vaults.
    pub kdf_iterations: u32,
    /// Minimum password length accepted by `initialize`. Values below
    /// [`DEFAULT_MIN_PASSWORD_LEN`] are raised to it; see [`password_floor`](Self::password_floor).
    pub min_password_len: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_ITERATIONS,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
        }
    }
}

impl VaultConfig {
    /// Effective minimum password length. Never below [`DEFAULT_MIN_PASSWORD_LEN`].
    #[must_use]
    pub fn password_floor(&self) -> usize {
        self.min_password_len.max(DEFAULT_MIN_PASSWORD_LEN)
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CIPHERVAULT_KDF_ITERATIONS`: PBKDF2 rounds for new vaults
    ///   (default: `100000`, values below the floor are ignored)
    #[must_use]
    pub fn from_env() -> Self {
        let kdf_iterations = std::env::var("CIPHERVAULT_KDF_ITERATIONS")
            .ok()
            .map(|raw| parse_iterations(&raw))
            .unwrap_or(DEFAULT_ITERATIONS);

        Self {
            kdf_iterations,
            ..Self::default()
        }
    }
}

fn parse_iterations(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(n) if n >= MIN_ITERATIONS => n,
        Ok(n) => {
            warn!(requested = n, min = MIN_ITERATIONS, "kdf iterations below floor, using default");
            DEFAULT_ITERATIONS
        }
        Err(_) => {
            warn!(value = %raw, "invalid CIPHERVAULT_KDF_ITERATIONS, using default");
            DEFAULT_ITERATIONS
        }
    }
}
