use std::sync::Arc;

use async_trait::async_trait;
use trigwatch_common::types::MetricValue;
use trigwatch_source::{MetricStore, SourceError};
use trigwatch_storage::{Database, OpContext, StorageError};

/// Serves the local metric source from the shared store under the
/// caller's deadline.
pub struct DatabaseMetricStore {
    db: Arc<Database>,
}

impl DatabaseMetricStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn store_error(e: StorageError) -> SourceError {
    SourceError::Store(e.to_string())
}

#[async_trait]
impl MetricStore for DatabaseMetricStore {
    async fn match_names(
        &self,
        ctx: &OpContext,
        pattern: &str,
    ) -> trigwatch_source::Result<Vec<String>> {
        self.db
            .match_metric_names(ctx, pattern)
            .await
            .map_err(store_error)
    }

    async fn fetch_points(
        &self,
        ctx: &OpContext,
        metric: &str,
        from: i64,
        until: i64,
    ) -> trigwatch_source::Result<Vec<MetricValue>> {
        self.db
            .fetch_metric_points(ctx, metric, from, until)
            .await
            .map_err(store_error)
    }

    async fn retention(&self, ctx: &OpContext, metric: &str) -> trigwatch_source::Result<i64> {
        self.db
            .metric_retention(ctx, metric)
            .await
            .map_err(store_error)
    }
}
