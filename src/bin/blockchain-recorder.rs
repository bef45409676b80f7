//! blockchain-recorder: runs the submission worker and confirmation monitor
//! that anchor terminal shipment events on a blockchain ledger.
//!
//! ## Configuration
//! See `Config::load`: a `config.yaml` in the working directory, overridden
//! by `SAGA_CONFIG` and `SAGA__*` environment variables.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipment_saga::blockchain::monitor::ConfirmationMonitor;
use shipment_saga::blockchain::recorder::BlockchainRecorder;
use shipment_saga::bootstrap::{build_blockchain_gateway, build_blockchain_store, build_messaging_port};
use shipment_saga::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("SAGA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(std::env::args().nth(1).as_deref()).map_err(|e| {
        error!("failed to load configuration: {}", e);
        e
    })?;

    info!("starting blockchain-recorder");

    let queue = build_messaging_port(&config).await?;
    let store = build_blockchain_store(&config).await?;
    let gateway = build_blockchain_gateway(&config).await?;

    let recorder = Arc::new(BlockchainRecorder::new(
        queue.clone(),
        store.clone(),
        gateway.clone(),
        config.blockchain.clone(),
    ));
    let monitor = Arc::new(ConfirmationMonitor::new(queue, store, gateway, config.blockchain.clone()));

    tokio::select! {
        result = recorder.run() => {
            if let Err(e) = result {
                error!(error = %e, "blockchain recorder stopped");
            }
        }
        _ = monitor.run() => {
            error!("confirmation monitor stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            monitor.stop();
        }
    }

    Ok(())
}
