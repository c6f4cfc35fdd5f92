use anyhow::Result;
use clap::{Args, Subcommand};

use govguard::config::GovernanceConfig;

use super::Context;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., limits.max_blob_bytes)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Config key (e.g., max_recovery_attempts)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,

    /// Initialize default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(ctx, &format),
        ConfigCommands::Get { key } => get_config(ctx, &key),
        ConfigCommands::Set { key, value } => set_config(ctx, &key, &value),
        ConfigCommands::Path => show_path(ctx),
        ConfigCommands::Init { force } => init_config(ctx, force),
    }
}

fn show_config(ctx: &Context, format: &str) -> Result<()> {
    let config = ctx.load_config()?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        _ => {
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
    }

    Ok(())
}

fn get_config(ctx: &Context, key: &str) -> Result<()> {
    let config = ctx.load_config()?;
    let value = config.get_value(key)?;
    println!("{}", value);
    Ok(())
}

fn set_config(ctx: &Context, key: &str, value: &str) -> Result<()> {
    let mut config = GovernanceConfig::load_from(&ctx.config_path)?;
    config.set_value(key, value)?;
    config.save_to(&ctx.config_path)?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn show_path(ctx: &Context) -> Result<()> {
    println!("{}", ctx.config_path.display());
    Ok(())
}

fn init_config(ctx: &Context, force: bool) -> Result<()> {
    let path = &ctx.config_path;

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    let root = match ctx.root_override()? {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let root = root.canonicalize().unwrap_or(root);
    ctx.paths.ensure_dirs()?;
    GovernanceConfig::write_template(path, &root)?;

    println!("Created config file at {}", path.display());
    println!("Governing {}", root.display());
    Ok(())
}
