//! Remote graphite-compatible source.

mod client;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use trigwatch_common::context::OpContext;
use trigwatch_expr::TimeSeries;

pub use client::RemoteClient;

use crate::error::{Result, SourceError};
use crate::{FetchedSeries, MetricSource, SourceKind};

const DEFAULT_STEP: i64 = 60;

/// Connection settings of the remote render API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub enabled: bool,
    /// Render endpoint, e.g. `http://graphite:8080/render`.
    pub url: String,
    pub user: String,
    pub password: String,
    /// Client-level timeout for the whole request. A shorter request
    /// deadline wins.
    pub timeout: Duration,
    /// Staleness window for remote triggers.
    pub metrics_ttl: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            user: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(60),
            metrics_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl RemoteConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.url.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RenderSeries {
    target: String,
    #[serde(default)]
    datapoints: Vec<(Option<f64>, i64)>,
}

impl RenderSeries {
    fn into_series(self, from: i64) -> TimeSeries {
        let start = self.datapoints.first().map_or(from, |(_, ts)| *ts);
        let step = match self.datapoints.as_slice() {
            [(_, a), (_, b), ..] if b > a => b - a,
            _ => DEFAULT_STEP,
        };
        let values = self.datapoints.into_iter().map(|(v, _)| v).collect();
        TimeSeries::new(self.target, start, step, values)
    }
}

/// Decode a graphite render payload.
///
/// # Examples
///
/// ```
/// use trigwatch_source::remote::decode_render;
///
/// let body = br#"[{"target":"a.b","datapoints":[[1.5,60],[null,120]]}]"#;
/// let series = decode_render(body, 0).unwrap();
/// assert_eq!(series[0].name, "a.b");
/// assert_eq!(series[0].step, 60);
/// assert_eq!(series[0].values, vec![Some(1.5), None]);
/// ```
pub fn decode_render(body: &[u8], from: i64) -> Result<Vec<TimeSeries>> {
    let decoded: Vec<RenderSeries> =
        serde_json::from_slice(body).map_err(|e| SourceError::BadPayload {
            cause: e.to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
        })?;
    Ok(decoded.into_iter().map(|s| s.into_series(from)).collect())
}

pub struct RemoteSource {
    client: RemoteClient,
}

impl RemoteSource {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: RemoteConfig) -> Result<Self> {
        Ok(Self::new(RemoteClient::new(config)?))
    }
}

#[async_trait]
impl MetricSource for RemoteSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    async fn fetch(
        &self,
        ctx: &OpContext,
        from: i64,
        until: i64,
        target: &str,
    ) -> Result<FetchedSeries> {
        let body = self.client.fetch(ctx, from, until, target).await?;
        let series = decode_render(&body, from)?;
        tracing::debug!(query = target, from, until, series = series.len(), "Remote fetch");
        Ok(FetchedSeries {
            target: target.to_string(),
            from,
            until,
            series,
        })
    }
}
