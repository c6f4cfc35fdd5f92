use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use govguard::snapshot::SnapshotLog;

use super::{Context, print_json};

#[derive(Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommands,
}

#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// Capture a snapshot of the safe root now
    Create,

    /// List recorded snapshots
    List,

    /// Show the most recent snapshot with all entries
    Latest,

    /// Check the hash chain of the snapshot log
    VerifyLog,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotSummary {
    id: String,
    created_at: String,
    entries: usize,
    files: usize,
}

pub async fn run(args: SnapshotArgs, ctx: &Context) -> Result<()> {
    match args.command {
        SnapshotCommands::Create => create(ctx).await,
        SnapshotCommands::List => list(ctx),
        SnapshotCommands::Latest => latest(ctx),
        SnapshotCommands::VerifyLog => verify_log(ctx),
    }
}

async fn create(ctx: &Context) -> Result<()> {
    let validator = ctx.validator()?;
    let manager = std::sync::Arc::clone(validator.snapshot_manager());
    let snapshot = tokio::task::spawn_blocking(move || manager.create_snapshot()).await??;
    println!(
        "Created snapshot {} ({} entries)",
        snapshot.id,
        snapshot.entries.len()
    );
    Ok(())
}

fn list(ctx: &Context) -> Result<()> {
    let log = log(ctx)?;
    let snapshots = log.snapshots()?;
    if snapshots.is_empty() {
        println!("No snapshots in {}", log.path().display());
        return Ok(());
    }

    let summaries: Vec<SnapshotSummary> = snapshots
        .iter()
        .map(|s| SnapshotSummary {
            id: s.id.clone(),
            created_at: s.created_at.to_rfc3339(),
            entries: s.entries.len(),
            files: s.files().count(),
        })
        .collect();
    print_json(&summaries)
}

fn latest(ctx: &Context) -> Result<()> {
    let log = log(ctx)?;
    match log.snapshots()?.pop() {
        Some(snapshot) => print_json(&snapshot),
        None => {
            println!("No snapshots in {}", log.path().display());
            Ok(())
        }
    }
}

fn verify_log(ctx: &Context) -> Result<()> {
    let log = log(ctx)?;
    let broken = log.verify_chain()?;
    if broken.is_empty() {
        println!("Snapshot log intact: {}", log.path().display());
        return Ok(());
    }
    for line in &broken {
        println!("Broken link at line {}", line + 1);
    }
    anyhow::bail!("{} broken link(s) in {}", broken.len(), log.path().display())
}

fn log(ctx: &Context) -> Result<SnapshotLog> {
    let config = ctx.load_config()?;
    Ok(SnapshotLog::new(ctx.storage(&config).snapshot_log()))
}
