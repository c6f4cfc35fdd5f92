//! CLI subcommand: `govguard paths`
//!
//! Prints all resolved paths for debugging and scripting.

use anyhow::Result;

use super::Context;

pub fn run(ctx: &Context) -> Result<()> {
    // The storage override only applies when a config is readable.
    let storage = match ctx.load_config() {
        Ok(config) => ctx.storage(&config),
        Err(_) => ctx.paths.clone(),
    };

    println!("govguard Paths (XDG Base Directory)");
    println!("===================================");
    println!();
    println!("Config:     {}", ctx.paths.config_dir.display());
    println!("  config.toml:    {}", ctx.config_path.display());
    println!();
    println!("Storage:    {}", storage.state_dir.display());
    println!("  snapshot log:   {}", storage.snapshot_log().display());
    println!("  blobs:          {}", storage.blob_dir().display());
    println!("  attestations:   {}", storage.attestations_dir().display());
    println!("  storage lock:   {}", storage.storage_lock().display());

    Ok(())
}
