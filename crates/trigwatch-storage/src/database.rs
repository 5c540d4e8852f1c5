use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use trigwatch_common::context::OpContext;
use crate::error::{Result, StorageError};
use crate::lock::{DistributedMutex, LockOptions, Pools};
use crate::store::SharedStore;

/// Expiry of the `retention` and `metrics` caches.
pub const CACHE_EXPIRY: Duration = Duration::from_secs(60);
/// Sweep cadence of expiring caches.
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Which process role opened the database. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbSource {
    #[default]
    Api,
    Checker,
    Filter,
    Notifier,
    Cli,
    Test,
}

impl fmt::Display for DbSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Api => "api",
            Self::Checker => "checker",
            Self::Filter => "filter",
            Self::Notifier => "notifier",
            Self::Cli => "cli",
            Self::Test => "test",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub source: DbSource,
    /// Upper bound of any single store call.
    pub op_timeout: Duration,
    /// How long locally ingested metric points are kept.
    pub metrics_ttl: Duration,
    pub lock: LockOptions,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            source: DbSource::Api,
            op_timeout: Duration::from_secs(5),
            metrics_ttl: Duration::from_secs(3600),
            lock: LockOptions::default(),
        }
    }
}

/// Coordinator over the shared store pools.
///
/// The first pool is the primary and answers every data call; all pools take
/// part in lock quorums. Three per-process caches sit in front of the metric
/// metadata: `retention` and `metrics` expire after a minute, while
/// `retention_saved` only marks what this process already persisted.
pub struct Database {
    pools: Pools,
    config: DatabaseConfig,
    retention: Arc<TtlCache<i64>>,
    retention_saved: Arc<TtlCache<bool>>,
    metrics: Arc<TtlCache<Vec<String>>>,
}

impl Database {
    /// # Errors
    ///
    /// [`StorageError::Other`] when `pools` is empty.
    pub fn new(pools: Vec<Arc<dyn SharedStore>>, config: DatabaseConfig) -> Result<Self> {
        if pools.is_empty() {
            return Err(StorageError::Other("at least one store pool is required".into()));
        }
        let retention = Arc::new(TtlCache::new("retention", Some(CACHE_EXPIRY)));
        let retention_saved = Arc::new(TtlCache::new("retention_saved", None));
        let metrics = Arc::new(TtlCache::new("metrics", Some(CACHE_EXPIRY)));
        retention.spawn_janitor(CACHE_SWEEP_INTERVAL);
        metrics.spawn_janitor(CACHE_SWEEP_INTERVAL);

        tracing::info!(
            source = %config.source,
            pools = pools.len(),
            primary = pools[0].name(),
            "Database initialized"
        );
        Ok(Self {
            pools: Arc::new(pools),
            config,
            retention,
            retention_saved,
            metrics,
        })
    }

    pub fn source(&self) -> DbSource {
        self.config.source
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The primary store client.
    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.pools[0]
    }

    pub fn retention_cache(&self) -> &TtlCache<i64> {
        &self.retention
    }

    pub fn retention_saved_cache(&self) -> &TtlCache<bool> {
        &self.retention_saved
    }

    pub fn metrics_cache(&self) -> &TtlCache<Vec<String>> {
        &self.metrics
    }

    /// Run one store call under `min(ctx deadline, op timeout)`.
    pub(crate) async fn run<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = ctx.bound(self.config.op_timeout);
        if ctx.is_expired() {
            tracing::warn!(op, source = %self.config.source, "Deadline passed before store call");
            return Err(StorageError::Timeout(Duration::ZERO));
        }
        match tokio::time::timeout(limit, fut).await {
            Ok(Err(e)) => {
                tracing::warn!(op, source = %self.config.source, error = %e, "Store call failed");
                Err(e)
            }
            Ok(ok) => ok,
            Err(_) => {
                tracing::warn!(op, source = %self.config.source, timeout_ms = limit.as_millis() as u64, "Store call timed out");
                Err(StorageError::Timeout(limit))
            }
        }
    }

    pub async fn ping(&self, ctx: &OpContext) -> Result<()> {
        self.run(ctx, "ping", self.store().ping()).await
    }

    /// A lock named `name` over every pool with the configured retry policy.
    pub fn new_mutex(&self, name: &str, lease: Duration) -> DistributedMutex {
        let options = LockOptions {
            lease,
            ..self.config.lock
        };
        DistributedMutex::new(name, self.pools.clone(), options, self.config.op_timeout)
    }

    pub(crate) fn metrics_ttl(&self) -> Duration {
        self.config.metrics_ttl
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod test_utils {
    use std::sync::Arc;

    use super::{Database, DatabaseConfig, DbSource};
    use trigwatch_common::context::OpContext;
    use crate::error::Result;
    use crate::store::{KeyTtl, MemoryStore};

    impl Database {
        /// Database over a fresh [`MemoryStore`].
        pub fn new_test() -> Self {
            let config = DatabaseConfig {
                source: DbSource::Test,
                ..Default::default()
            };
            match Self::new(vec![Arc::new(MemoryStore::new())], config) {
                Ok(db) => db,
                Err(e) => unreachable!("a single pool is always accepted: {e}"),
            }
        }

        /// Empty the primary store and every cache.
        pub async fn flush(&self, ctx: &OpContext) -> Result<()> {
            self.run(ctx, "flush", self.store().flush()).await?;
            self.retention.clear();
            self.retention_saved.clear();
            self.metrics.clear();
            Ok(())
        }

        pub async fn key_ttl(&self, ctx: &OpContext, key: &str) -> Result<KeyTtl> {
            self.run(ctx, "ttl", self.store().ttl(key)).await
        }

        pub async fn delete_key(&self, ctx: &OpContext, key: &str) -> Result<bool> {
            self.run(ctx, "delete", self.store().delete(key)).await
        }
    }
}
