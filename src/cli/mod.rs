pub mod attest;
pub mod config;
pub mod paths;
pub mod snapshot;
pub mod validate;
pub mod watch;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use govguard::config::GovernanceConfig;
use govguard::metrics::TracingMetricsSink;
use govguard::paths::Paths;
use govguard::validator::PathValidator;

#[derive(Parser)]
#[command(name = "govguard")]
#[command(
    author,
    version,
    about = "Safe-root path validation, self-healing structure and build attestations"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "GOVGUARD_CONFIG")]
    pub config: Option<String>,

    /// Safe root, overriding the configured one
    #[arg(short, long, global = true, env = "GOVGUARD_ROOT")]
    pub root: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate one path, healing it if it is missing
    Validate(validate::ValidateArgs),

    /// Validate every declared structure node
    Check,

    /// Snapshot operations
    Snapshot(snapshot::SnapshotArgs),

    /// Print the sha256 digest of a file
    Digest(attest::DigestArgs),

    /// Create and look up build attestations
    Attest(attest::AttestArgs),

    /// Verify an attestation file
    Verify(attest::VerifyArgs),

    /// Take scheduled snapshots until interrupted
    Watch(watch::WatchArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved directory paths
    Paths,
}

/// Config and storage locations shared by the subcommands.
pub struct Context {
    pub paths: Paths,
    pub config_path: PathBuf,
    config_override: Option<String>,
    root_override: Option<PathBuf>,
}

impl Context {
    pub fn new(cli: &Cli) -> Result<Self> {
        let paths = Paths::resolve()?;
        let config_path = match &cli.config {
            Some(path) => PathBuf::from(shellexpand::tilde(path).to_string()),
            None => paths.config_file(),
        };
        Ok(Self {
            paths,
            config_path,
            config_override: cli.config.clone(),
            root_override: cli.root.clone(),
        })
    }

    /// Load the config file, applying `--root`. Without a config file,
    /// `--root` alone is enough to run with defaults.
    pub fn load_config(&self) -> Result<GovernanceConfig> {
        let mut config = if self.config_path.exists() {
            GovernanceConfig::load_from(&self.config_path)?
        } else if let Some(root) = &self.root_override {
            GovernanceConfig::new(absolute_root(root)?)
        } else if self.config_override.is_some() {
            anyhow::bail!("Config file not found: {}", self.config_path.display());
        } else {
            anyhow::bail!(
                "No config at {}. Pass --root or run `govguard config init --root <dir>`.",
                self.config_path.display()
            );
        };

        if let Some(root) = &self.root_override {
            config.safe_root = absolute_root(root)?;
            config.validate()?;
        }
        Ok(config)
    }

    /// `--root`, made absolute.
    pub fn root_override(&self) -> Result<Option<PathBuf>> {
        self.root_override.as_deref().map(absolute_root).transpose()
    }

    /// Storage paths after the config's `storage_dir` override.
    pub fn storage(&self, config: &GovernanceConfig) -> Paths {
        config.storage_paths(self.paths.clone())
    }

    /// Validator over persistent storage. Scheduling is left to the caller.
    pub fn validator(&self) -> Result<PathValidator> {
        let mut config = self.load_config()?;
        config.enable_snapshotting = false;
        let storage = self.storage(&config);

        PathValidator::builder(config)
            .storage_dir(storage.state_dir.clone())
            .metrics_sink(Arc::new(TracingMetricsSink))
            .build()
            .with_context(|| format!("failed to open storage at {}", storage.state_dir.display()))
    }
}

fn absolute_root(root: &std::path::Path) -> Result<PathBuf> {
    let expanded = PathBuf::from(shellexpand::tilde(&root.to_string_lossy()).to_string());
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    Ok(std::env::current_dir()?.join(expanded))
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
