//! saga-orchestrator: runs the saga orchestrator, compensation worker,
//! stuck-saga reaper, and the read-only admin API side by side.
//!
//! ## Configuration
//! See `Config::load`: a `config.yaml` in the working directory, overridden
//! by `SAGA_CONFIG` and `SAGA__*` environment variables.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipment_saga::bootstrap::{build_messaging_port, build_saga_store};
use shipment_saga::config::Config;
use shipment_saga::saga::compensation::CompensationWorker;
use shipment_saga::saga::reaper::StuckSagaReaper;
use shipment_saga::saga::SagaOrchestrator;

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

    info!("starting saga-orchestrator");

    let queue = build_messaging_port(&config).await?;
    let store = build_saga_store(&config).await?;

    let orchestrator = Arc::new(SagaOrchestrator::new(queue.clone(), store.clone()));
    let compensation = Arc::new(CompensationWorker::new(queue.clone(), store.clone()));
    let reaper = Arc::new(StuckSagaReaper::new(store.clone(), config.saga.clone()));

    let admin_store = store.clone();
    let admin_port = config.admin.port;

    tokio::select! {
        result = orchestrator.run() => {
            if let Err(e) = result {
                error!(error = %e, "saga orchestrator stopped");
            }
        }
        result = compensation.run() => {
            if let Err(e) = result {
                error!(error = %e, "compensation worker stopped");
            }
        }
        _ = reaper.run() => {
            error!("stuck saga reaper stopped unexpectedly");
        }
        result = shipment_saga::admin::serve(admin_store, admin_port) => {
            if let Err(e) = result {
                error!(error = %e, "admin API stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
