//! Regatta Server - always-on route computation and race clock

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regatta_server::config::{Config, StorageMode};
use regatta_server::loops;
use regatta_server::persistence::{
    init_database, MemoryRepository, Repository, Seed, SqliteRepository,
};
use regatta_server::state::AppState;
use regatta_server::api;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("regatta_server=debug".parse()?),
        )
        .init();

    tracing::info!("Starting Regatta Server...");

    let config = Config::from_env();
    let repo = open_repository(&config).await?;
    let port = config.server_port;
    let state = Arc::new(AppState::new(config, repo));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut loop_handles = Vec::new();
    loop_handles.push(tokio::spawn(loops::race_clock_loop::run_race_clock_loop(
        state.clone(),
        shutdown_tx.subscribe(),
    )));
    loop_handles.push(tokio::spawn(loops::maintenance_loop::run_maintenance_loop(
        state.clone(),
        shutdown_tx.subscribe(),
    )));

    let app = api::routes().with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down background work");
    let _ = shutdown_tx.send(());
    state.scheduler().cancel_all();
    for handle in loop_handles {
        if let Err(err) = handle.await {
            tracing::warn!("Background loop ended abnormally: {}", err);
        }
    }

    Ok(())
}

async fn open_repository(config: &Config) -> Result<Arc<dyn Repository>> {
    let seed = match &config.seed_path {
        Some(path) => Some(Seed::load(path)?),
        None => None,
    };

    match config.storage {
        StorageMode::Sqlite => {
            let db = init_database(&config.db_path, config.db_max_connections).await?;
            let repo = SqliteRepository::new(db);
            if let Some(seed) = &seed {
                repo.apply_seed(seed, Utc::now()).await?;
                tracing::info!("Applied seed to {}", config.db_path);
            }
            Ok(Arc::new(repo))
        }
        StorageMode::Memory => {
            let repo = match &seed {
                Some(seed) => MemoryRepository::from_seed(seed, Utc::now())?,
                None => MemoryRepository::new(),
            };
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(repo))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
}
