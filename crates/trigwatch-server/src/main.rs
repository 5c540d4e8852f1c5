use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use trigwatch_server::app;
use trigwatch_server::config::{ServerConfig, StoreBackend};
use trigwatch_server::search::{MemorySearchIndex, Searcher};
use trigwatch_server::state::AppState;
use trigwatch_storage::{
    Database, DbSource, MemoryStore, OpContext, SharedStore, SqliteStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    trigwatch_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trigwatch=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("config/server.toml");
    run_server(config_path).await
}

fn open_pools(config: &ServerConfig) -> Result<Vec<Arc<dyn SharedStore>>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart and not shared");
            Ok(vec![Arc::new(MemoryStore::new())])
        }
        StoreBackend::Sqlite => config
            .store
            .pool_paths()
            .iter()
            .map(|path| -> Result<Arc<dyn SharedStore>> {
                let store = SqliteStore::open(Path::new(path))
                    .with_context(|| format!("Failed to open store {}", path.display()))?;
                Ok(Arc::new(store) as Arc<dyn SharedStore>)
            })
            .collect(),
    }
}

/// Rebuild the search index from the persisted triggers.
async fn seed_index(db: &Database, index: &MemorySearchIndex) -> Result<()> {
    let triggers = db
        .list_triggers(&OpContext::background())
        .await
        .context("Failed to load triggers for the search index")?;
    for trigger in &triggers {
        index.index(trigger, false).await?;
    }
    tracing::info!(count = triggers.len(), "Search index seeded");
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        backend = ?config.store.backend,
        store = %config.store.path,
        pools = config.store.pool_paths().len(),
        remote = config.remote.enabled,
        "trigwatch-server starting"
    );

    let pools = open_pools(&config)?;
    let db = Arc::new(Database::new(pools, config.database_config(DbSource::Api))?);
    db.ping(&OpContext::with_timeout(config.store.operation_timeout()))
        .await
        .context("Backing store is not reachable")?;

    let index = Arc::new(MemorySearchIndex::new());
    seed_index(&db, &index).await?;

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let state = AppState::new(config, db, index)?;
    let app = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind {http_addr}"))?;
    tracing::info!(addr = %http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;
    Ok(())
}
