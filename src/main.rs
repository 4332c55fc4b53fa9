//! Stagehand entry point
//!
//! Default mode runs the cache watcher daemon until ctrl-c. `stagehand
//! organize` performs a single organize pass and prints its summary as JSON.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagehand::config::{Config, ManagerConfig};
use stagehand::jobs::CacheWatcher;
use stagehand::services::{
    ArrClient, DebridClient, DedupLedger, Dispatcher, ManagerKind, ManagerTarget, Organizer,
    ServicesManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagehand=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let cache = Arc::new(DebridClient::new(
        config.debrid_api_url.clone(),
        config.debrid_api_key.clone(),
    ));
    let dispatcher = Dispatcher::new(&config.watch_folder, &config.staging_folder);
    let ledger = DedupLedger::load(&config.ledger_path);
    let watcher = Arc::new(CacheWatcher::new(
        cache,
        dispatcher,
        ledger,
        config.poll_interval,
    ));

    let movies = manager_target(ManagerKind::Movie, &config.movie_manager);
    let tv = config
        .tv_manager
        .as_ref()
        .map(|m| manager_target(ManagerKind::Tv, m));
    let organizer = Arc::new(Organizer::new(&config.staging_folder, movies, tv));

    let mut manager = ServicesManager::new();
    manager.register(watcher);
    manager.register(organizer);

    if std::env::args().nth(1).as_deref() == Some("organize") {
        let summary = manager.run_once("organizer").await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    manager.start("cache_watcher").await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    manager.stop("cache_watcher").await?;
    Ok(())
}

fn manager_target(kind: ManagerKind, cfg: &ManagerConfig) -> ManagerTarget {
    ManagerTarget {
        manager: Arc::new(ArrClient::new(
            kind,
            cfg.url.clone(),
            cfg.api_key.clone(),
            cfg.root_folder.clone(),
        )),
        kind,
        library_path: cfg.library_path.clone(),
        declared_root: cfg.root_folder.clone(),
    }
}
