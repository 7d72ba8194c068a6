mod backends;
mod config;
mod error;
mod logger;
mod options;
mod routes;
mod state;

use crate::backends::build_object_store;
use crate::backends::supervisor::SupervisorClient;
use crate::config::AppConfig;
use crate::options::OptionsService;
use crate::state::AppState;
use snapshot_sync_engine::{Engine, Ledger, Scheduler, SystemClock};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    logger::init(&config.log_level)?;
    tracing::info!("Starting snapshot sync on port {}", config.port);

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let options = Arc::new(OptionsService::load(&config).await?);

    // Backends
    let snapshots = Arc::new(SupervisorClient::new(
        &config.supervisor_url,
        &config.supervisor_token,
    )?);
    let store = build_object_store(&config.storage).await?;

    let engine = Arc::new(
        Engine::new(
            snapshots,
            store,
            Ledger::new(config.ledger_path()),
            Arc::new(SystemClock),
            options.settings(),
        )
        .await?,
    );

    // Backup timer, sync ticker and options listener
    let mut scheduler = Scheduler::new(engine.clone(), config.sync_interval);
    scheduler.start(Some(options.subscribe()));

    let state = Arc::new(AppState::new(engine, options, config.clone()));
    let app = routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler.cancellation_token()))
        .await?;

    tracing::info!("Shutting down...");
    scheduler.stop().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
