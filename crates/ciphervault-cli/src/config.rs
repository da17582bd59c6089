//! CLI configuration.
//!
//! Loaded from `CIPHERVAULT_*` environment variables with defaults;
//! command-line flags override whatever the environment says.

use std::path::PathBuf;

/// Default location of the vault file.
pub const DEFAULT_PATH: &str = "./ciphervault.redb";

/// Default log filter when neither `RUST_LOG` nor `CIPHERVAULT_LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Which blob store backs the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Single redb file on disk.
    Redb,
    /// In-process only; everything is gone when the command exits.
    Memory,
}

/// Resolved CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub backend: BackendKind,
    /// Vault file for the redb backend.
    pub path: PathBuf,
    /// Log filter (e.g. `warn`, `ciphervault_core=debug`).
    pub log_level: String,
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CIPHERVAULT_STORAGE`: `redb` or `memory` (default: `redb`)
    /// - `CIPHERVAULT_PATH`: vault file (default: `./ciphervault.redb`)
    /// - `CIPHERVAULT_LOG_LEVEL`: log filter (default: `warn`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let backend = match lookup("CIPHERVAULT_STORAGE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "memory" => BackendKind::Memory,
            _ => BackendKind::Redb,
        };

        let path = lookup("CIPHERVAULT_PATH")
            .filter(|p| !p.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_PATH), PathBuf::from);

        let log_level =
            lookup("CIPHERVAULT_LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned());

        Self {
            backend,
            path,
            log_level,
        }
    }

    /// Apply command-line flags on top.
    #[must_use]
    pub fn with_overrides(mut self, backend: Option<BackendKind>, path: Option<PathBuf>) -> Self {
        if let Some(backend) = backend {
            self.backend = backend;
        }
        if let Some(path) = path {
            self.path = path;
        }
        self
    }
}
