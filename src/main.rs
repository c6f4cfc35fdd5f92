use anyhow::Result;
use clap::Parser;

mod cli;

use cli::{Cli, Commands, Context};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let ctx = Context::new(&cli)?;
    init_logging(&cli, &ctx);

    match cli.command {
        Commands::Validate(args) => cli::validate::run(args, &ctx).await,
        Commands::Check => cli::validate::check(&ctx).await,
        Commands::Snapshot(args) => cli::snapshot::run(args, &ctx).await,
        Commands::Digest(args) => cli::attest::digest(args, &ctx).await,
        Commands::Attest(args) => cli::attest::run(args, &ctx).await,
        Commands::Verify(args) => cli::attest::verify(args, &ctx).await,
        Commands::Watch(args) => cli::watch::run(args, &ctx).await,
        Commands::Config(args) => cli::config::run(args, &ctx).await,
        Commands::Paths => cli::paths::run(&ctx),
    }
}

fn init_logging(cli: &Cli, ctx: &Context) {
    // RUST_LOG wins, then --verbose, then the configured level.
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        ctx.load_config()
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}
