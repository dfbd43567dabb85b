//! Contest Server
//!
//! Competition lifecycle, reconciliation loop and contribution gateway

use std::sync::Arc;

use clap::Parser;
use contest_core::{
    run_reconciliation_loop, CompetitionLifecycleManager, CompetitionStore, Config,
    ExternalContributionGateway, LogSink, MemoryStore, SqliteStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "contest-server")]
#[command(about = "Competition management server")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "CONTEST_CONFIG", default_value = "contest.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_from(&args.config)?;

    info!("Starting contest server");

    let store: Arc<dyn CompetitionStore> = match &config.database.path {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => {
            info!("No database path configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let gateway = Arc::new(ExternalContributionGateway::from_config(&config).await);
    let lifecycle = Arc::new(CompetitionLifecycleManager::new(store, Arc::new(LogSink)));

    run_reconciliation_loop(
        lifecycle.clone(),
        config.lifecycle.interval(),
        config.lifecycle.initial_delay(),
    );
    info!(
        "Reconciliation loop started (every {} seconds)",
        config.lifecycle.interval().as_secs()
    );

    contest_core::server::run_server(
        &config.server.host,
        config.server.port,
        lifecycle,
        gateway,
    )
    .await?;

    Ok(())
}
