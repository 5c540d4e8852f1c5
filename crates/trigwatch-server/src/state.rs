use std::sync::Arc;

use chrono::{DateTime, Utc};
use trigwatch_common::types::TtlPolicy;
use trigwatch_source::SourceProvider;
use trigwatch_storage::Database;

use crate::config::ServerConfig;
use crate::local_metrics::DatabaseMetricStore;
use crate::search::Searcher;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub sources: SourceProvider,
    pub searcher: Arc<dyn Searcher>,
    pub ttl: TtlPolicy,
    pub config: Arc<ServerConfig>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the metric sources from configuration: the local source reads
    /// the shared store, the remote one exists only when enabled.
    pub fn new(
        config: ServerConfig,
        db: Arc<Database>,
        searcher: Arc<dyn Searcher>,
    ) -> anyhow::Result<Self> {
        let local = Arc::new(DatabaseMetricStore::new(db.clone()));
        let sources = SourceProvider::from_config(local, &config.remote.to_remote_config())?;
        Ok(Self {
            db,
            sources,
            searcher,
            ttl: config.ttl_policy(),
            config: Arc::new(config),
            start_time: Utc::now(),
        })
    }
}
