use anyhow::Result;
use clap::Args;
use std::time::Duration;

use govguard::structure::StructureKind;
use govguard::validator::{ValidateOptions, ValidationOutcome};

use super::{Context, print_json};

#[derive(Args)]
pub struct ValidateArgs {
    /// Path to validate, relative to the safe root or absolute
    pub path: String,

    /// Report only; never create anything
    #[arg(long)]
    pub no_recovery: bool,

    /// Give up after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Kind to require for undeclared paths (file or directory)
    #[arg(long)]
    pub kind: Option<StructureKind>,
}

pub async fn run(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let validator = ctx.validator()?;

    let mut opts = ValidateOptions::default();
    if args.no_recovery {
        opts = opts.without_recovery();
    }
    if let Some(ms) = args.timeout_ms {
        opts = opts.with_timeout(Duration::from_millis(ms));
    }
    if let Some(kind) = args.kind {
        opts = opts.expecting(kind);
    }

    let outcome = validator.validate_path(&args.path, opts).await;
    print_json(&outcome)?;
    exit_on_failure(&[outcome])
}

/// `govguard check`: validate every declared node.
pub async fn check(ctx: &Context) -> Result<()> {
    let validator = ctx.validator()?;
    if validator.graph().is_empty() {
        println!("No declared structure (set structure_file in the config).");
        return Ok(());
    }

    let outcomes = validator.validate_declared().await;
    for outcome in &outcomes {
        let reason = outcome
            .reason
            .map(|r| format!(" ({})", r))
            .unwrap_or_default();
        println!("{:<10} {}{}", outcome.status.as_str(), outcome.path, reason);
    }
    println!();
    print_json(&validator.metrics())?;
    exit_on_failure(&outcomes)
}

fn exit_on_failure(outcomes: &[ValidationOutcome]) -> Result<()> {
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{} path(s) failed validation", failed);
    }
    Ok(())
}
