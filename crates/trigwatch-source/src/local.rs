use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use trigwatch_common::context::OpContext;
use trigwatch_common::types::MetricValue;
use trigwatch_expr::series::pattern_matches;
use trigwatch_expr::{fetch_windows, parse, Evaluator, PrefetchedResolver, TimeSeries};

use crate::error::Result;
use crate::{FetchedSeries, MetricSource, SourceKind};

/// Retention used for metrics that never had one recorded.
pub const DEFAULT_RETENTION: i64 = 60;

/// Read access to already-ingested series. Every call is bounded by the
/// deadline of `ctx`.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Names of stored metrics matching a graphite pattern.
    async fn match_names(&self, ctx: &OpContext, pattern: &str) -> Result<Vec<String>>;

    /// Points of `metric` with `from <= timestamp <= until`, oldest first.
    async fn fetch_points(
        &self,
        ctx: &OpContext,
        metric: &str,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricValue>>;

    /// Step of the series in seconds.
    async fn retention(&self, ctx: &OpContext, metric: &str) -> Result<i64>;
}

#[derive(Debug, Default)]
struct StoredMetric {
    retention: i64,
    points: Vec<MetricValue>,
}

/// Process-local metric store.
#[derive(Debug, Default)]
pub struct MemoryMetricStore {
    metrics: RwLock<BTreeMap<String, StoredMetric>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&self, metric: &str, timestamp: i64, value: f64) {
        let mut metrics = self
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = metrics.entry(metric.to_string()).or_insert_with(|| StoredMetric {
            retention: DEFAULT_RETENTION,
            points: Vec::new(),
        });
        let idx = entry.points.partition_point(|p| p.timestamp <= timestamp);
        entry.points.insert(idx, MetricValue { timestamp, value });
    }

    pub fn set_retention(&self, metric: &str, retention: i64) {
        let mut metrics = self
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        metrics.entry(metric.to_string()).or_default().retention = retention.max(1);
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn match_names(&self, _ctx: &OpContext, pattern: &str) -> Result<Vec<String>> {
        let metrics = self
            .metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(metrics
            .keys()
            .filter(|name| pattern_matches(pattern, name))
            .cloned()
            .collect())
    }

    async fn fetch_points(
        &self,
        _ctx: &OpContext,
        metric: &str,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricValue>> {
        let metrics = self
            .metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(metrics
            .get(metric)
            .map(|m| {
                m.points
                    .iter()
                    .filter(|p| p.timestamp >= from && p.timestamp <= until)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn retention(&self, _ctx: &OpContext, metric: &str) -> Result<i64> {
        let metrics = self
            .metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(metrics
            .get(metric)
            .map(|m| m.retention)
            .unwrap_or(DEFAULT_RETENTION))
    }
}

/// Evaluates targets over a [`MetricStore`].
pub struct LocalSource {
    store: Arc<dyn MetricStore>,
}

impl LocalSource {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    async fn load(
        &self,
        ctx: &OpContext,
        pattern: &str,
        from: i64,
        until: i64,
    ) -> Result<Vec<TimeSeries>> {
        let mut series = Vec::new();
        for name in self.store.match_names(ctx, pattern).await? {
            let retention = self.store.retention(ctx, &name).await?;
            let points = self.store.fetch_points(ctx, &name, from, until).await?;
            series.push(TimeSeries::from_points(
                name, from, until, retention, &points,
            ));
        }
        Ok(series)
    }
}

#[async_trait]
impl MetricSource for LocalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    async fn fetch(
        &self,
        ctx: &OpContext,
        from: i64,
        until: i64,
        target: &str,
    ) -> Result<FetchedSeries> {
        let expr = parse(target).map_err(trigwatch_expr::ExprError::from)?;
        let mut resolver = PrefetchedResolver::new();
        for window in fetch_windows(&expr, from, until)? {
            let series = self
                .load(ctx, &window.pattern, window.from, window.until)
                .await?;
            resolver.insert(&window, series);
        }
        let series = Evaluator::new(&resolver, from, until).eval(&expr)?;
        tracing::debug!(query = target, from, until, series = series.len(), "Local fetch");
        Ok(FetchedSeries {
            target: target.to_string(),
            from,
            until,
            series,
        })
    }
}
