use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use govguard::provenance::{
    AttestationService, AttestationStore, BuildAttestation, BuilderIdentity, load_attestation,
    verify_attestation,
};
use govguard::resolver::SafePathResolver;

use super::{Context, print_json};

#[derive(Args)]
pub struct DigestArgs {
    /// File to digest
    pub path: String,

    /// Read through the resolver only; never heal a missing file
    #[arg(long)]
    pub direct: bool,
}

#[derive(Args)]
pub struct AttestArgs {
    #[command(subcommand)]
    pub command: AttestCommands,
}

#[derive(Subcommand)]
pub enum AttestCommands {
    /// Digest an artifact and save a build attestation for it
    Create(CreateArgs),

    /// List saved attestations
    List {
        /// Attestation directory (default: the attestations dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Find saved attestations for an artifact digest
    Find {
        /// `sha256:<hex>`, or bare hex
        #[arg(long)]
        digest: String,

        /// Attestation directory (default: the attestations dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print one saved attestation
    Show {
        /// Attestation id
        id: String,

        /// Attestation directory (default: the attestations dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct CreateArgs {
    /// Artifact to attest
    pub path: String,

    /// Builder identity recorded in the predicate
    #[arg(long)]
    pub builder_id: String,

    /// Builder version recorded in the predicate
    #[arg(long)]
    pub builder_version: String,

    /// Directory to save `<id>.json` in (default: the attestations dir)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Read through the resolver only; never heal a missing file
    #[arg(long)]
    pub direct: bool,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Attestation JSON file
    pub file: PathBuf,

    /// Also re-hash the subject and compare it with the recorded digest
    #[arg(long)]
    pub content: bool,
}

fn service(ctx: &Context, direct: bool) -> Result<AttestationService> {
    if direct {
        let config = ctx.load_config()?;
        let resolver = SafePathResolver::new(&config.safe_root)?;
        return Ok(AttestationService::direct(resolver)
            .with_max_file_bytes(config.limits.max_file_bytes));
    }
    Ok(AttestationService::new(Arc::new(ctx.validator()?)))
}

pub async fn digest(args: DigestArgs, ctx: &Context) -> Result<()> {
    let digest = service(ctx, args.direct)?
        .generate_file_digest(&args.path)
        .await?;
    println!("{}", digest);
    Ok(())
}

fn open_store(ctx: &Context, dir: Option<PathBuf>) -> Result<AttestationStore> {
    let dir = match dir {
        Some(dir) => dir,
        None => {
            let config = ctx.load_config()?;
            ctx.storage(&config).attestations_dir()
        }
    };
    Ok(AttestationStore::new(dir))
}

pub async fn run(args: AttestArgs, ctx: &Context) -> Result<()> {
    match args.command {
        AttestCommands::Create(args) => create(args, ctx).await,
        AttestCommands::List { dir } => {
            let store = open_store(ctx, dir)?;
            print_summaries(&store.list()?);
            Ok(())
        }
        AttestCommands::Find { digest, dir } => {
            let found = open_store(ctx, dir)?.for_digest(&digest)?;
            if found.is_empty() {
                anyhow::bail!("no attestations for {}", digest);
            }
            print_summaries(&found);
            Ok(())
        }
        AttestCommands::Show { id, dir } => {
            let store = open_store(ctx, dir)?;
            match store.get(&id)? {
                Some(attestation) => print_json(&attestation),
                None => anyhow::bail!("no attestation {} in {}", id, store.dir().display()),
            }
        }
    }
}

fn print_summaries(attestations: &[BuildAttestation]) {
    if attestations.is_empty() {
        println!("No attestations.");
        return;
    }
    for a in attestations {
        let builder = &a.predicate.builder;
        println!(
            "{}  {}  {}  {}@{}",
            a.id, a.subject.digest, a.subject.path, builder.id, builder.version
        );
    }
}

async fn create(args: CreateArgs, ctx: &Context) -> Result<()> {
    let service = service(ctx, args.direct)?;
    let attestation = service
        .create_build_attestation(
            &args.path,
            BuilderIdentity::new(args.builder_id, args.builder_version),
        )
        .await?;

    let store = open_store(ctx, args.out)?;
    let path = store
        .save(&attestation)
        .with_context(|| format!("failed to save attestation in {}", store.dir().display()))?;

    print_json(&attestation)?;
    eprintln!("Saved {}", path.display());
    Ok(())
}

pub async fn verify(args: VerifyArgs, ctx: &Context) -> Result<()> {
    let attestation = load_attestation(&args.file)
        .with_context(|| format!("cannot read {}", args.file.display()))?;

    if !verify_attestation(&attestation) {
        anyhow::bail!("{}: malformed attestation", args.file.display());
    }
    println!("{}: well-formed ({})", attestation.id, attestation.subject.digest);

    if args.content {
        let matches = service(ctx, true)?
            .verify_subject_content(&attestation)
            .await?;
        if !matches {
            anyhow::bail!(
                "{}: subject {} no longer matches the attested digest",
                attestation.id,
                attestation.subject.path
            );
        }
        println!("{}: subject content matches", attestation.id);
    }
    Ok(())
}
