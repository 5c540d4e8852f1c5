use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use trigwatch_common::types::TtlPolicy;
use trigwatch_source::RemoteConfig;
use trigwatch_storage::{DatabaseConfig, DbSource, LockOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Primary database file.
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Extra database files taking part in lock quorums.
    #[serde(default)]
    pub pools: Vec<String>,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// How long locally ingested points are kept.
    #[serde(default = "default_store_metrics_ttl_secs")]
    pub metrics_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            pools: Vec::new(),
            operation_timeout_ms: default_operation_timeout_ms(),
            metrics_ttl_secs: default_store_metrics_ttl_secs(),
        }
    }
}

impl StoreConfig {
    /// Primary path first, then the extra pools.
    pub fn pool_paths(&self) -> Vec<PathBuf> {
        std::iter::once(&self.path)
            .chain(self.pools.iter())
            .map(PathBuf::from)
            .collect()
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_tries")]
    pub tries: u32,
    #[serde(default = "default_min_retry_delay_ms")]
    pub min_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            tries: default_tries(),
            min_retry_delay_ms: default_min_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs.max(1))
    }

    pub fn options(&self) -> LockOptions {
        LockOptions {
            lease: self.lease(),
            tries: self.tries.max(1),
            min_retry_delay: Duration::from_millis(self.min_retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Staleness window for local triggers.
    #[serde(default = "default_local_metrics_ttl_secs")]
    pub metrics_ttl_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            metrics_ttl_secs: default_local_metrics_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_remote_metrics_ttl_secs")]
    pub metrics_ttl_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            user: String::new(),
            password: String::new(),
            timeout_secs: default_remote_timeout_secs(),
            metrics_ttl_secs: default_remote_metrics_ttl_secs(),
        }
    }
}

impl RemoteSettings {
    pub fn to_remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            enabled: self.enabled,
            url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            metrics_ttl: Duration::from_secs(self.metrics_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_pager_ttl_secs")]
    pub pager_ttl_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            pager_ttl_secs: default_pager_ttl_secs(),
        }
    }
}

impl SearchConfig {
    pub fn pager_ttl(&self) -> Duration {
        Duration::from_secs(self.pager_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Empty allows every origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_store_path() -> String {
    "data/trigwatch.db".to_string()
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

fn default_store_metrics_ttl_secs() -> u64 {
    3600
}

fn default_lease_secs() -> u64 {
    8
}

fn default_tries() -> u32 {
    32
}

fn default_min_retry_delay_ms() -> u64 {
    50
}

fn default_max_retry_delay_ms() -> u64 {
    250
}

fn default_local_metrics_ttl_secs() -> u64 {
    3600
}

fn default_remote_timeout_secs() -> u64 {
    60
}

fn default_remote_metrics_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_page_size() -> usize {
    10
}

fn default_pager_ttl_secs() -> u64 {
    1800
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            store: StoreConfig::default(),
            lock: LockConfig::default(),
            local: LocalConfig::default(),
            remote: RemoteSettings::default(),
            search: SearchConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{path}'"))?;
        Ok(config)
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            Duration::from_secs(self.local.metrics_ttl_secs),
            Duration::from_secs(self.remote.metrics_ttl_secs),
        )
    }

    pub fn database_config(&self, source: DbSource) -> DatabaseConfig {
        DatabaseConfig {
            source,
            op_timeout: self.store.operation_timeout(),
            metrics_ttl: Duration::from_secs(self.store.metrics_ttl_secs),
            lock: self.lock.options(),
        }
    }
}
