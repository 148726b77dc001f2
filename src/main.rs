use clap::Parser;
use pockets::adapters::{BrokerRestClient, CatalogRestClient, PostgresStore};
use pockets::cli::{self, Cli};
use pockets::config::{AppConfig, LoggingConfig};
use pockets::engine::{HoldingsLedger, PocketLifecycleController, TransactionLog};
use pockets::error::Result;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("configuration: {}", e);
        }
        std::process::exit(2);
    }

    let store = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    let catalog = Arc::new(CatalogRestClient::new(&config.catalog)?);
    let broker = Arc::new(BrokerRestClient::new(&config.broker)?);
    if broker.is_dry_run() {
        warn!("broker dry-run mode: placements are simulated, nothing reaches the broker");
    }

    let ledger: Arc<dyn HoldingsLedger> = store.clone();
    let transactions: Arc<dyn TransactionLog> = store.clone();
    let controller = PocketLifecycleController::new(
        catalog,
        broker,
        ledger,
        transactions,
        &config.execution,
    );

    let code = cli::run(cli.command, &controller, &store).await?;
    std::process::exit(code);
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
