mod commands;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mep_service::GcConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mep", about = "Attachment storage maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete attachments no owner references anymore
    #[command(name = "storage:garbage-collection")]
    GarbageCollection {
        /// Only list the attachments that would be deleted
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove stored files that have no attachment record
    #[command(name = "storage:orphan-files")]
    OrphanFiles {
        /// Only list the files that would be removed
        #[arg(long)]
        dry_run: bool,

        /// Seconds a file must have existed before it counts as orphaned
        #[arg(long, env = "MEP_ORPHAN_GRACE_PERIOD", default_value_t = 86_400)]
        grace_period: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db = mep_db::connect(&mep_db::DbConfig::from_env()).await?;
    let driver = mep_store::create_driver(&mep_store::DriverConfig::from_env()?)?;
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::GarbageCollection { dry_run } => {
            let collectors = GcConfig::from_env()?.collectors()?;
            if collectors.is_empty() {
                tracing::warn!("no collectors registered, set MEP_GC_CONFIG");
            }
            commands::garbage_collection(db, driver, collectors, dry_run, &mut stdout).await?;
        }
        Commands::OrphanFiles {
            dry_run,
            grace_period,
        } => {
            commands::orphan_files(
                db,
                driver,
                Duration::from_secs(grace_period),
                dry_run,
                &mut stdout,
            )
            .await?;
        }
    }

    Ok(())
}
