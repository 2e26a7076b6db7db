use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dossier_sync::fetch::DirectoryFetcher;
use dossier_sync::pipeline::{self, RunOptions};
use dossier_sync::reconciliation::ReconcileScope;
use dossier_sync::{Config, Stage};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "dossier-sync")]
#[command(about = "Mirror the buildings registry and reconcile dossier addresses", version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "DOSSIER_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Use the feeds already in the data directory
    #[arg(long, global = true)]
    skip_fetch: bool,

    /// Stop importing after this many archive files
    #[arg(long, global = true)]
    max_files: Option<usize>,

    /// Minimum number of addresses an import must contain
    #[arg(long, global = true)]
    min_case_count: Option<usize>,

    /// Keep staging and skip archive files already imported
    #[arg(long, global = true)]
    resume: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh the registry replica from the exports
    SyncRegistry,
    /// Import the dossier archive into staging
    ImportDossiers,
    /// Resolve staged addresses against the replica
    Reconcile {
        /// Re-resolve every address, not only pending ones
        #[arg(long)]
        all: bool,
    },
    /// Check staging coverage without promoting
    Validate,
    /// Full refresh: fetch, sync, import, reconcile, validate, promote
    Run,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.skip_fetch {
        config.import.skip_fetch = true;
    }
    if cli.max_files.is_some() {
        config.import.max_files = cli.max_files;
    }
    if let Some(count) = cli.min_case_count {
        config.import.min_case_count = count;
    }

    info!(database = %config.paths.database.display(), data_dir = %config.paths.data_dir.display(), "🏗️  dossier-sync");
    let conn = pipeline::open_database(&config.paths.database)?;

    match cli.command {
        Command::SyncRegistry => {
            let report = pipeline::sync_registry(&conn, &config)?;
            println!("{}", report.summary());
            if let Some(integrity) = &report.integrity {
                println!("{}", integrity.summary());
            }
        }
        Command::ImportDossiers => {
            let report = pipeline::import_dossiers(&conn, &config, cli.resume)?;
            println!("{}", report.summary());
        }
        Command::Reconcile { all } => {
            let scope = if all { ReconcileScope::All } else { ReconcileScope::Pending };
            let report = pipeline::reconcile(&conn, &config, Stage::Staging, scope)?;
            println!("{}", report.summary());
        }
        Command::Validate => {
            let report = pipeline::validate(&conn, &config, Stage::Staging)?;
            println!("{}", report.summary());
            println!("✅ staging passes every check");
        }
        Command::Run => {
            let fetcher = DirectoryFetcher::from_config(&config);
            let options = RunOptions { resume: cli.resume };
            let report = pipeline::run(
                &conn,
                &config,
                &options,
                fetcher.as_ref().map(|f| f as &dyn dossier_sync::SourceFetcher),
            )?;
            println!("{}", report.summary());
        }
    }

    Ok(())
}
