use anyhow::Result;
use clap::Args;
use std::time::Duration;
use tracing::info;

use super::{Context, print_json};

#[derive(Args)]
pub struct WatchArgs {
    /// Snapshot interval in milliseconds (default: snapshot_interval_ms)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Validate every declared node before the first snapshot
    #[arg(long)]
    pub check: bool,
}

pub async fn run(args: WatchArgs, ctx: &Context) -> Result<()> {
    let validator = ctx.validator()?;
    let interval = args
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| validator.config().snapshot_interval());

    if args.check {
        let healed = validator
            .validate_declared()
            .await
            .iter()
            .filter(|o| !o.attempts.is_empty())
            .count();
        info!("Declared structure checked, {} node(s) needed recovery", healed);
    }

    validator.schedule_snapshots(interval)?;
    info!(
        "Watching {} (snapshot every {:?}); Ctrl+C to stop",
        validator.root().display(),
        interval
    );

    tokio::signal::ctrl_c().await?;

    validator.cancel_snapshots();
    validator.publish_metrics();
    print_json(&validator.metrics())?;
    Ok(())
}
