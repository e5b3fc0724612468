//! Aviator Crash Server
//!
//! Reads configuration from the environment, restores the ledger snapshot
//! and serves rounds until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use aviator::{
    VERSION,
    game::{snapshot::LedgerSnapshot, table::Table},
    network::server::{CrashServer, ServerConfig},
    payments::{provider::TonApiProvider, reconcile::Reconciler},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let config = ServerConfig::from_env();
    let history_len = config.round.history_len;

    info!("Aviator Server v{}", VERSION);
    info!(
        "Betting window {:?}, tick {:?}, crash range {}..{}",
        config.round.betting_window, config.round.tick_interval, config.round.crash_min, config.round.crash_max
    );
    if !config.auth.is_configured() {
        warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; hello is trusted");
    }

    let table = match &config.snapshot_path {
        Some(path) => {
            let snapshot = LedgerSnapshot::load(path)
                .await
                .with_context(|| format!("failed to load snapshot {}", path.display()))?;
            match snapshot {
                Some(snapshot) => {
                    info!(
                        "Restored {} accounts and {} processed payments from {}",
                        snapshot.account_count(),
                        snapshot.processed_count(),
                        path.display()
                    );
                    Table::restore(snapshot, history_len)
                }
                None => {
                    info!("No snapshot at {}, starting empty", path.display());
                    Table::new(history_len)
                }
            }
        }
        None => {
            warn!("AVIATOR_SNAPSHOT_PATH unset; balances are not persisted");
            Table::new(history_len)
        }
    };

    let reconciler = if config.reconcile.is_enabled() {
        let provider = TonApiProvider::new(&config.reconcile).context("failed to create payment provider")?;
        Some(Reconciler::new(provider, config.reconcile.memo_prefix.clone()))
    } else {
        None
    };

    let server = Arc::new(CrashServer::new(config, table, reconciler));
    let mut runner = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
        result = &mut runner => {
            result.context("server task panicked")??;
            return Ok(());
        }
    }

    runner.await.context("server task panicked")??;
    info!("Server stopped");
    Ok(())
}
