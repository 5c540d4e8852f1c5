use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::time::Duration;
use utoipa::ToSchema;

/// How warn/error levels of a trigger are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Rising,
    Falling,
    Expression,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
            Self::Expression => write!(f, "expression"),
        }
    }
}

/// State a trigger falls into when its metrics stop arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TtlState {
    #[default]
    Nodata,
    Error,
    Warn,
    Ok,
    Del,
}

/// An alerting rule over one or more target expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Trigger {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Description template, see `render_description`.
    #[serde(default)]
    pub desc: Option<String>,
    pub targets: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Selects the remote time-series source instead of the local store.
    #[serde(default)]
    pub is_remote: bool,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub warn_value: Option<f64>,
    #[serde(default)]
    pub error_value: Option<f64>,
    #[serde(default)]
    pub expression: Option<String>,
    /// Seconds without data before `ttl_state` applies.
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub ttl_state: TtlState,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Trigger {
    /// Uniqueness key of the rule definition: two triggers with the same
    /// source, targets and levels share a fingerprint regardless of name.
    ///
    /// # Examples
    ///
    /// ```
    /// use trigwatch_common::types::Trigger;
    ///
    /// let mut a = Trigger::new("cpu", vec!["servers.*.cpu".into()]);
    /// a.warn_value = Some(80.0);
    /// let mut b = a.clone();
    /// b.name = "cpu (copy)".into();
    /// assert_eq!(a.fingerprint(), b.fingerprint());
    /// b.is_remote = true;
    /// assert_ne!(a.fingerprint(), b.fingerprint());
    /// ```
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(if self.is_remote { b"remote" } else { b"local\0" });
        for target in &self.targets {
            hasher.update(target.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.trigger_type.to_string().as_bytes());
        hasher.update(format!("{:?}|{:?}", self.warn_value, self.error_value).as_bytes());
        if let Some(expr) = &self.expression {
            hasher.update(expr.as_bytes());
        }
        let digest = hasher.finalize();
        let mut s = String::with_capacity(64);
        for b in digest {
            let _ = write!(s, "{b:02x}");
        }
        s
    }

    /// Minimal trigger with the given name and targets; other fields default.
    pub fn new(name: &str, targets: Vec<String>) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            desc: None,
            targets,
            tags: Vec::new(),
            is_remote: false,
            trigger_type: TriggerType::Rising,
            warn_value: None,
            error_value: None,
            expression: None,
            ttl: None,
            ttl_state: TtlState::Nodata,
            updated_by: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Staleness windows per source kind. Read once from configuration and never
/// mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub local: Duration,
    pub remote: Duration,
}

impl TtlPolicy {
    pub fn new(local: Duration, remote: Duration) -> Self {
        Self { local, remote }
    }

    pub fn ttl_for(&self, is_remote: bool) -> Duration {
        if is_remote {
            self.remote
        } else {
            self.local
        }
    }
}

/// A single ingested value of a named series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Unix seconds.
    pub timestamp: i64,
    pub value: f64,
}

/// A batch entry written into the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub metric: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub value: f64,
    /// Resolution of the series in seconds.
    pub retention: i64,
}
