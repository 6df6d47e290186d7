use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use pointledger::config::Config;
use pointledger::db;
use pointledger::scheduler::AutoRefillScheduler;
use pointledger::{PgLedgerStore, telemetry};
use tokio::sync::oneshot;
use tracing::{info, warn};

/// `ledgerd [CONFIG.toml]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("loading configuration")?;
    telemetry::init_tracing(&config.log_filter);

    let pool = db::connect(&config.database_url, config.max_connections)
        .await
        .context("connecting to PostgreSQL")?;
    db::run_migrations(&pool).await.context("running migrations")?;
    info!(max_connections = config.max_connections, "database ready");

    let store = Arc::new(PgLedgerStore::new(pool.clone()));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let scheduler = if config.scheduler.enabled {
        let scheduler = AutoRefillScheduler::new(store.clone(), config.scheduler.clone());
        Some(tokio::spawn(async move {
            scheduler
                .run(async {
                    let _ = stop_rx.await;
                })
                .await;
        }))
    } else {
        info!("auto refill scheduler disabled");
        None
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    let _ = stop_tx.send(());
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }
    pool.close().await;
    Ok(())
}
