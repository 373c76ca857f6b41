use anyhow::{Context, Result};
use log::{error, info};
use plate_sync::config::{self, Config, CONFIG_ENV_VAR};
use plate_sync::db::repositories::PlatesRepository;
use plate_sync::db::DatabaseService;
use plate_sync::device_manager::IsapiClient;
use plate_sync::sync::{SourceSyncer, SyncCoordinator, SyncScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn config_path() -> Result<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .with_context(|| {
            format!(
                "Usage: plate-sync <config.toml|config.json> (or set {})",
                CONFIG_ENV_VAR
            )
        })
}

async fn run_app(config: Config) -> Result<()> {
    info!(
        "Starting plate sync for {} camera(s), every {} minute(s)",
        config.cameras.len(),
        config.sync.interval_minutes
    );

    let codec = config.time_codec()?;
    let tables: Vec<&str> = config.cameras.iter().map(|c| c.table.as_str()).collect();

    // Failing to reach the store at startup is the only fatal condition
    let database = DatabaseService::new(&config.database, &tables)
        .await
        .context("Failed to initialize database")?;

    let mut syncers = Vec::with_capacity(config.cameras.len());
    for camera in &config.cameras {
        let client = IsapiClient::builder()
            .uri(&camera.base_url)?
            .credentials(&camera.username, &camera.password)
            .timeout(Duration::from_secs(config.sync.request_timeout_secs))
            .time_codec(codec)
            .build()
            .with_context(|| format!("Failed to set up camera {}", camera.name))?;
        let store = PlatesRepository::new(database.pool.clone(), &camera.table)?;

        info!("Camera {} ({}) -> table {}", camera.name, client.uri(), camera.table);
        syncers.push(SourceSyncer::new(
            &camera.name,
            Arc::new(client),
            Arc::new(store),
            codec,
            &config.sync.default_direction,
        ));
    }

    let coordinator = Arc::new(SyncCoordinator::new(syncers));
    info!(
        "Sync sources: {}",
        coordinator.sources().collect::<Vec<_>>().join(", ")
    );
    let scheduler = Arc::new(SyncScheduler::new(
        coordinator,
        Duration::from_secs(config.sync.interval_minutes * 60),
    ));
    let scheduler_handle = scheduler.clone().start();

    // Wait for termination signals
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    scheduler.shutdown();
    if let Err(e) = scheduler_handle.await {
        error!("Sync scheduler task failed: {}", e);
    }

    database.close().await;
    info!("Shutdown complete");

    Ok(())
}

fn main() {
    let config = match config_path().and_then(|path| config::load_config(&path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.sync.log_level.as_str()),
    )
    .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app(config)) {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
