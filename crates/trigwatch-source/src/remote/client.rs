use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Request, StatusCode};
use trigwatch_common::context::OpContext;

use super::RemoteConfig;
use crate::error::{Result, SourceError};

/// Issues single render requests against a graphite-compatible API.
///
/// Every call is one timed attempt; retries belong to the caller.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    config: RemoteConfig,
}

impl RemoteClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Fetch the raw render payload for `target` over `[from, until]`.
    pub async fn fetch(
        &self,
        ctx: &OpContext,
        from: i64,
        until: i64,
        target: &str,
    ) -> Result<Bytes> {
        let request = self.prepare_request(from, until, target)?;
        self.make_request(ctx, request).await
    }

    /// Build the GET request. Query keys are emitted in sorted order.
    pub fn prepare_request(&self, from: i64, until: i64, target: &str) -> Result<Request> {
        let query = [
            ("format", "json".to_string()),
            ("from", from.to_string()),
            ("target", target.to_string()),
            ("until", until.to_string()),
        ];
        let mut builder = self.client.get(&self.config.url).query(&query);
        if !self.config.user.is_empty() && !self.config.password.is_empty() {
            builder = builder.basic_auth(&self.config.user, Some(&self.config.password));
        }
        builder
            .build()
            .map_err(|e| SourceError::InvalidConfig(format!("invalid remote request: {e}")))
    }

    /// Execute a prepared request and classify the outcome. The body is
    /// read to the end on every path where a response arrived. The exchange
    /// is cut off at the client timeout or the deadline of `ctx`, whichever
    /// comes first.
    pub async fn make_request(&self, ctx: &OpContext, request: Request) -> Result<Bytes> {
        let path = request.url().path().to_string();
        let budget = ctx.bound(self.config.timeout);
        let exchange = async {
            let response = self.client.execute(request).await.map_err(|e| {
                tracing::warn!(path = %path, error = %e, "Remote request failed");
                self.unavailable(&path, &e)
            })?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| self.unavailable(&path, &e))?;
            Ok::<_, SourceError>((status, body))
        };
        let (status, body) = match tokio::time::timeout(budget, exchange).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                tracing::warn!(
                    path = %path,
                    budget_ms = budget.as_millis() as u64,
                    "Remote request deadline exceeded"
                );
                return Err(SourceError::RemoteUnavailable {
                    timeout: budget,
                    path,
                    cause: "request deadline exceeded".into(),
                });
            }
        };
        if status != StatusCode::OK {
            tracing::warn!(path = %path, status = status.as_u16(), "Remote bad response");
            return Err(SourceError::RemoteBadResponse {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }

    fn unavailable(&self, path: &str, err: &reqwest::Error) -> SourceError {
        SourceError::RemoteUnavailable {
            timeout: self.config.timeout,
            path: path.to_string(),
            cause: err.to_string(),
        }
    }
}
