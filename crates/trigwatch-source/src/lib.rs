//! Metric sources behind one capability interface.
//!
//! A trigger names its backend explicitly with `is_remote`; the
//! [`SourceProvider`] hands out the matching [`MetricSource`]. The local
//! source evaluates targets over an in-process [`local::MetricStore`], the
//! remote source asks an external graphite-compatible render API through
//! [`remote::RemoteClient`].

pub mod error;
pub mod local;
pub mod provider;
pub mod remote;


use async_trait::async_trait;
use trigwatch_common::context::OpContext;
use trigwatch_expr::TimeSeries;

pub use error::{Result, SourceError};
pub use local::{LocalSource, MemoryMetricStore, MetricStore};
pub use provider::SourceProvider;
pub use remote::{RemoteClient, RemoteConfig, RemoteSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Local,
    Remote,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Result of fetching one target over `[from, until]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSeries {
    pub target: String,
    pub from: i64,
    pub until: i64,
    pub series: Vec<TimeSeries>,
}

impl FetchedSeries {
    pub fn names(&self) -> Vec<String> {
        self.series.iter().map(|s| s.name.clone()).collect()
    }
}

/// Capability: fetch time series for a target over a time range.
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Fetch and evaluate `target` over `[from, until]` (unix seconds).
    /// Nothing the fetch does outlives the deadline of `ctx`.
    ///
    /// # Errors
    ///
    /// Expression errors for targets the source cannot evaluate, remote
    /// errors for transport or response failures.
    async fn fetch(
        &self,
        ctx: &OpContext,
        from: i64,
        until: i64,
        target: &str,
    ) -> Result<FetchedSeries>;
}
