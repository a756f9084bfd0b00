use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use mep_service::processor::{TinifyConfig, TinifyProcessor, UploadedFileNameProcessor};
use mep_service::{FileStorageManager, ProcessorPipeline};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mep-server", about = "Attachment upload and lookup API")]
struct Cli {
    /// Address to bind
    #[arg(long, env = "MEP_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(long, env = "MEP_PORT", default_value_t = 3720)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let db = mep_db::connect(&mep_db::DbConfig::from_env()).await?;
    let driver = mep_store::create_driver(&mep_store::DriverConfig::from_env()?)?;
    let tinify = TinifyProcessor::new(TinifyConfig::from_env())?;
    if tinify.is_dummy() {
        info!("tinify running in dummy mode");
    }
    let pipeline = ProcessorPipeline::builder()
        .with(UploadedFileNameProcessor)
        .with(tinify)
        .build();
    let manager = FileStorageManager::new(driver, db, pipeline);
    let constraints = mep_server::constraints_from_env()?;

    let addr = SocketAddr::new(cli.bind.parse()?, cli.port);
    let listener = TcpListener::bind(addr).await?;
    info!("mep-server listening on http://{addr}");

    mep_server::serve(listener, manager, constraints).await
}
