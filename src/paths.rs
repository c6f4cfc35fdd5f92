//! XDG Base Directory compliant path resolution.
//!
//! Each directory is resolved through a three-level fallback:
//! 1. govguard env var (`GOVGUARD_CONFIG_DIR`, `GOVGUARD_STATE_DIR`)
//! 2. XDG env var (`XDG_CONFIG_HOME`, `XDG_STATE_HOME`) via `etcetera`
//! 3. Platform default (`~/.config`, `~/.local/state`)
//!
//! All paths are absolute. Relative paths from env vars are ignored per XDG spec.

use std::path::{Path, PathBuf};

use crate::error::{GovernanceError, Result};
use crate::snapshot::{BLOB_DIRNAME, SNAPSHOT_LOG_FILENAME, STORAGE_LOCK_FILENAME};

pub const ATTESTATIONS_DIRNAME: &str = "attestations";

/// Resolved directories for config and governance storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// config.toml and structure rules live here
    pub config_dir: PathBuf,

    /// Governance storage area: snapshot log, blobs, exported attestations
    pub state_dir: PathBuf,
}

impl Paths {
    /// Resolve using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy().map_err(|e| {
            GovernanceError::Config(format!("Failed to determine base directories: {}", e))
        })?;

        let config_dir = env_or(&env_fn, "GOVGUARD_CONFIG_DIR", || {
            strategy.config_dir().join("govguard")
        });

        let state_dir = env_or(&env_fn, "GOVGUARD_STATE_DIR", || {
            let base = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base.join("govguard")
        });

        Ok(Self {
            config_dir,
            state_dir,
        })
    }

    /// Use `dir` as the storage area instead of the resolved state dir.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn snapshot_log(&self) -> PathBuf {
        self.state_dir.join(SNAPSHOT_LOG_FILENAME)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.state_dir.join(BLOB_DIRNAME)
    }

    pub fn attestations_dir(&self) -> PathBuf {
        self.state_dir.join(ATTESTATIONS_DIRNAME)
    }

    pub fn storage_lock(&self) -> PathBuf {
        self.state_dir.join(STORAGE_LOCK_FILENAME)
    }

    /// Create config and state directories (mode 0700 on Unix).
    pub fn ensure_dirs(&self) -> Result<()> {
        create_dir_with_mode(&self.config_dir)?;
        create_dir_with_mode(&self.state_dir)?;
        Ok(())
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| PathBuf::from(shellexpand::tilde(v.trim()).to_string()))
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}
