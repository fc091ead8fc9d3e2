use std::path::PathBuf;

use clap::Parser;
use sharechain_storage::{
    backends::{memory::MemoryStorage, sqlite::SqliteStorage},
    BackendKind, ShareStorageService, ShareStore, StorageConfig,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sharechain-storage")]
#[command(about = "Inspects a stored share chain")]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print every stored record to stdout as one JSON object per line
    #[arg(long)]
    pub dump: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => StorageConfig::from_file(path).map_err(|err| {
            error!("Failed to load config {}: {}", path.display(), err);
            err
        })?,
        None => StorageConfig::default(),
    };
    info!(backend = ?config.backend, path = %config.path.display(), "Starting sharechain storage");

    let backend: Box<dyn ShareStore> = match config.backend {
        BackendKind::Memory => Box::new(MemoryStorage::new()),
        BackendKind::Sqlite => Box::new(SqliteStorage::new(config.path.clone())),
    };
    let service = ShareStorageService::new(backend);
    service.initialize().await?;

    if args.dump {
        for record in service.replay().await?.to_records() {
            println!("{}", serde_json::to_string(&record)?);
        }
    }

    let tracker = service.restore(config.tracker.clone()).await?;
    let heads = tracker.shares().heads().len();
    let tails = tracker.shares().tails().len();
    info!(
        shares = tracker.shares().len(),
        verified = tracker.verified().len(),
        heads,
        tails,
        "share chain restored"
    );

    let health = service.health_check().await?;
    info!(?health, "storage health");

    service.close().await?;
    info!("Storage role shutdown complete");
    Ok(())
}
