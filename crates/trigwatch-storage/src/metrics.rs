//! Locally ingested metric data on the shared store.
//!
//! Layout: `metric-data:{name}` is a sorted set of `"{ts} {value}"` members
//! scored by timestamp, `metric-names` scores every known name by its latest
//! timestamp and `metric-retention:{name}` holds the step in seconds.

use trigwatch_common::types::{MetricPoint, MetricValue};
use trigwatch_expr::series::pattern_matches;

use trigwatch_common::context::OpContext;
use crate::database::Database;
use crate::error::Result;

/// Step used for metrics without a stored retention.
pub const DEFAULT_RETENTION_SECS: i64 = 60;

const METRIC_NAMES_KEY: &str = "metric-names";

fn data_key(metric: &str) -> String {
    format!("metric-data:{metric}")
}

fn retention_key(metric: &str) -> String {
    format!("metric-retention:{metric}")
}

fn decode_member(member: &str) -> Option<MetricValue> {
    let (ts, value) = member.split_once(' ')?;
    Some(MetricValue {
        timestamp: ts.parse().ok()?,
        value: value.parse().ok()?,
    })
}

impl Database {
    /// Step of `metric` in seconds, served from the `retention` cache when
    /// possible.
    ///
    /// # Errors
    ///
    /// Store failures on a cache miss.
    pub async fn metric_retention(&self, ctx: &OpContext, metric: &str) -> Result<i64> {
        if let Some(retention) = self.retention_cache().get(metric) {
            return Ok(retention);
        }
        let stored = self
            .run(ctx, "get", self.store().get(&retention_key(metric)))
            .await?;
        let retention = stored
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|r| *r > 0)
            .unwrap_or(DEFAULT_RETENTION_SECS);
        self.retention_cache().set(metric, retention);
        Ok(retention)
    }

    /// Store points, index their names and trim data older than the
    /// configured metrics TTL. A metric's retention is written once per
    /// process.
    pub async fn save_metrics(&self, ctx: &OpContext, points: &[MetricPoint]) -> Result<()> {
        let store = self.store();
        let ttl_secs = self.metrics_ttl().as_secs() as f64;
        for point in points {
            let key = data_key(&point.metric);
            let ts = point.timestamp as f64;
            let member = format!("{} {}", point.timestamp, point.value);
            self.run(ctx, "zremrange", store.zremrange_by_score(&key, ts, ts))
                .await?;
            self.run(ctx, "zadd", store.zadd(&key, ts, &member)).await?;
            self.run(ctx, "zadd", store.zadd(METRIC_NAMES_KEY, ts, &point.metric))
                .await?;
            self.run(
                ctx,
                "zremrange",
                store.zremrange_by_score(&key, f64::NEG_INFINITY, ts - ttl_secs),
            )
            .await?;

            if self.retention_saved_cache().get(&point.metric).is_none() {
                let retention = point.retention.max(1);
                self.run(
                    ctx,
                    "set",
                    store.set(&retention_key(&point.metric), &retention.to_string(), None),
                )
                .await?;
                self.retention_saved_cache().set(&point.metric, true);
                self.retention_cache().set(&point.metric, retention);
            }
        }
        tracing::debug!(points = points.len(), "Metrics saved");
        Ok(())
    }

    /// Known metric names matching a graphite pattern, sorted. Results are
    /// cached per pattern in the `metrics` cache.
    pub async fn match_metric_names(&self, ctx: &OpContext, pattern: &str) -> Result<Vec<String>> {
        if let Some(names) = self.metrics_cache().get(pattern) {
            return Ok(names);
        }
        let all = self
            .run(
                ctx,
                "zrange",
                self.store()
                    .zrange_by_score(METRIC_NAMES_KEY, f64::NEG_INFINITY, f64::INFINITY),
            )
            .await?;
        let mut names: Vec<String> = all
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| pattern_matches(pattern, name))
            .collect();
        names.sort();
        self.metrics_cache().set(pattern, names.clone());
        Ok(names)
    }

    /// Points of `metric` with `from <= timestamp <= until`, oldest first.
    pub async fn fetch_metric_points(
        &self,
        ctx: &OpContext,
        metric: &str,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricValue>> {
        let rows = self
            .run(
                ctx,
                "zrange",
                self.store()
                    .zrange_by_score(&data_key(metric), from as f64, until as f64),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|(member, _)| {
                let point = decode_member(member);
                if point.is_none() {
                    tracing::warn!(metric, member = %member, "Skipping undecodable point");
                }
                point
            })
            .collect())
    }
}
