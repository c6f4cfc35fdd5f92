use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::digest::DEFAULT_MAX_FILE_BYTES;
use crate::error::{GovernanceError, Result};
use crate::fs_guard;
use crate::paths::Paths;
use crate::structure::{StructureRulesFile, normalize_relative};

/// Config files larger than this are refused (1 MB).
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Every governed path must resolve inside this directory.
    pub safe_root: PathBuf,

    #[serde(default = "default_true")]
    pub enable_auto_recovery: bool,

    #[serde(default)]
    pub enable_snapshotting: bool,

    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    #[serde(default = "default_true")]
    pub dag_enabled: bool,

    /// Snapshot log, blobs and attestations. Defaults to the XDG state dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,

    /// Structure rules file, relative to `safe_root`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_file: Option<PathBuf>,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest file that is digested (snapshots and attestations).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Largest file whose content is kept so fallback recovery can restore it.
    #[serde(default = "default_max_blob_bytes")]
    pub max_blob_bytes: u64,

    #[serde(default = "default_max_snapshot_entries")]
    pub max_snapshot_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}
fn default_snapshot_interval_ms() -> u64 {
    300_000
}
fn default_max_recovery_attempts() -> u32 {
    3
}
fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}
fn default_max_blob_bytes() -> u64 {
    1024 * 1024
}
fn default_max_snapshot_entries() -> usize {
    100_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_blob_bytes: default_max_blob_bytes(),
            max_snapshot_entries: default_max_snapshot_entries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GovernanceConfig {
    /// Defaults for everything except the root.
    pub fn new(safe_root: impl Into<PathBuf>) -> Self {
        Self {
            safe_root: safe_root.into(),
            enable_auto_recovery: true,
            enable_snapshotting: false,
            snapshot_interval_ms: default_snapshot_interval_ms(),
            max_recovery_attempts: default_max_recovery_attempts(),
            dag_enabled: true,
            storage_dir: None,
            structure_file: None,
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Parse TOML, expand `~` in paths, and validate.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| GovernanceError::Config(format!("invalid config: {}", e)))?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_guard::read_validated_string(path, MAX_CONFIG_BYTES)?;
        let config = Self::parse(&content)
            .map_err(|e| GovernanceError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| GovernanceError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Write the commented first-run template for `safe_root`.
    pub fn write_template(path: &Path, safe_root: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let root = toml::Value::String(safe_root.display().to_string()).to_string();
        fs::write(path, DEFAULT_CONFIG_TEMPLATE.replace("{safe_root}", &root))?;
        Ok(())
    }

    fn expand_paths(&mut self) {
        self.safe_root = expand_tilde(&self.safe_root);
        if let Some(dir) = self.storage_dir.take() {
            self.storage_dir = Some(expand_tilde(&dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.safe_root.is_absolute() {
            return Err(GovernanceError::Config(format!(
                "safe_root must be an absolute path: {}",
                self.safe_root.display()
            )));
        }
        if self.max_recovery_attempts == 0 {
            return Err(GovernanceError::Config(
                "max_recovery_attempts must be at least 1".to_string(),
            ));
        }
        if self.snapshot_interval_ms == 0 {
            return Err(GovernanceError::Config(
                "snapshot_interval_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(dir) = &self.storage_dir
            && !dir.is_absolute()
        {
            return Err(GovernanceError::Config(format!(
                "storage_dir must be an absolute path: {}",
                dir.display()
            )));
        }
        if let Some(file) = &self.structure_file
            && normalize_relative(&file.to_string_lossy()).is_none()
        {
            return Err(GovernanceError::Config(format!(
                "structure_file must be a path inside safe_root: {}",
                file.display()
            )));
        }
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    /// `paths` with the configured storage override applied.
    pub fn storage_paths(&self, paths: Paths) -> Paths {
        match &self.storage_dir {
            Some(dir) => paths.with_storage_dir(dir),
            None => paths,
        }
    }

    /// The configured structure rules, if any.
    pub fn structure_source(&self) -> Option<StructureRulesFile> {
        let file = self.structure_file.as_ref()?;
        let relative = normalize_relative(&file.to_string_lossy())?;
        Some(StructureRulesFile::new(self.safe_root.join(relative)))
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["safe_root"] => Ok(self.safe_root.display().to_string()),
            ["enable_auto_recovery"] => Ok(self.enable_auto_recovery.to_string()),
            ["enable_snapshotting"] => Ok(self.enable_snapshotting.to_string()),
            ["snapshot_interval_ms"] => Ok(self.snapshot_interval_ms.to_string()),
            ["max_recovery_attempts"] => Ok(self.max_recovery_attempts.to_string()),
            ["dag_enabled"] => Ok(self.dag_enabled.to_string()),
            ["storage_dir"] => Ok(display_opt(&self.storage_dir)),
            ["structure_file"] => Ok(display_opt(&self.structure_file)),
            ["limits", "max_file_bytes"] => Ok(self.limits.max_file_bytes.to_string()),
            ["limits", "max_blob_bytes"] => Ok(self.limits.max_blob_bytes.to_string()),
            ["limits", "max_snapshot_entries"] => Ok(self.limits.max_snapshot_entries.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            _ => Err(GovernanceError::Config(format!("Unknown config key: {}", key))),
        }
    }

    /// Set a dotted key. The result is validated before it is kept.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        let mut updated = self.clone();

        match parts.as_slice() {
            ["safe_root"] => updated.safe_root = expand_tilde(Path::new(value)),
            ["enable_auto_recovery"] => updated.enable_auto_recovery = parse_value(key, value)?,
            ["enable_snapshotting"] => updated.enable_snapshotting = parse_value(key, value)?,
            ["snapshot_interval_ms"] => updated.snapshot_interval_ms = parse_value(key, value)?,
            ["max_recovery_attempts"] => updated.max_recovery_attempts = parse_value(key, value)?,
            ["dag_enabled"] => updated.dag_enabled = parse_value(key, value)?,
            ["storage_dir"] => {
                updated.storage_dir = non_empty(value).map(|v| expand_tilde(Path::new(v)))
            }
            ["structure_file"] => updated.structure_file = non_empty(value).map(PathBuf::from),
            ["limits", "max_file_bytes"] => {
                updated.limits.max_file_bytes = parse_value(key, value)?
            }
            ["limits", "max_blob_bytes"] => {
                updated.limits.max_blob_bytes = parse_value(key, value)?
            }
            ["limits", "max_snapshot_entries"] => {
                updated.limits.max_snapshot_entries = parse_value(key, value)?
            }
            ["logging", "level"] => updated.logging.level = value.to_string(),
            _ => {
                return Err(GovernanceError::Config(format!(
                    "Unknown config key: {}",
                    key
                )));
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GovernanceError::Config(format!("Invalid value for {}: {}", key, e)))
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn display_opt(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

fn expand_tilde(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string())
}

/// First-run config template; `{safe_root}` is substituted on write.
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# govguard configuration

# Every validated or attested path must resolve inside this directory.
safe_root = {safe_root}

# Rebuild missing structure instead of failing.
enable_auto_recovery = true
max_recovery_attempts = 3

# Rebuild declared parents before children (structure_file).
dag_enabled = true
# structure_file = "governance/structure.toml"   # relative to safe_root

# Periodic snapshots used as the fallback restore source.
enable_snapshotting = false
snapshot_interval_ms = 300000

# Snapshot log, content blobs and exported attestations.
# Default: XDG state dir (~/.local/state/govguard)
# Override with GOVGUARD_STATE_DIR or:
# storage_dir = "/var/lib/govguard"

[limits]
max_file_bytes = 524288000
max_blob_bytes = 1048576
max_snapshot_entries = 100000

[logging]
level = "info"
"#;
