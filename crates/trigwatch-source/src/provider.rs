use std::sync::Arc;

use crate::error::{Result, SourceError};
use crate::local::{LocalSource, MetricStore};
use crate::remote::{RemoteConfig, RemoteSource};
use crate::MetricSource;

/// Hands out the source a trigger asks for.
///
/// Selection follows the trigger's `is_remote` flag only; the target
/// text is never inspected.
#[derive(Clone)]
pub struct SourceProvider {
    local: Arc<dyn MetricSource>,
    remote: Option<Arc<dyn MetricSource>>,
}

impl SourceProvider {
    pub fn new(local: Arc<dyn MetricSource>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn MetricSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Local source over `store`; a remote source only when `remote` is
    /// enabled.
    pub fn from_config(store: Arc<dyn MetricStore>, remote: &RemoteConfig) -> Result<Self> {
        let provider = Self::new(Arc::new(LocalSource::new(store)));
        if !remote.is_enabled() {
            tracing::info!("Remote source disabled");
            return Ok(provider);
        }
        tracing::info!(url = %remote.url, timeout_secs = remote.timeout.as_secs(), "Remote source enabled");
        Ok(provider.with_remote(Arc::new(RemoteSource::from_config(remote.clone())?)))
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// # Errors
    ///
    /// [`SourceError::RemoteNotConfigured`] when `is_remote` is set and no
    /// remote source exists.
    pub fn get(&self, is_remote: bool) -> Result<Arc<dyn MetricSource>> {
        if !is_remote {
            return Ok(self.local.clone());
        }
        self.remote.clone().ok_or(SourceError::RemoteNotConfigured)
    }
}
