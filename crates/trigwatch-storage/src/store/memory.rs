use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{Result, StorageError};
use crate::store::{KeyTtl, SharedStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
struct Inner {
    kv: BTreeMap<String, Entry>,
    zsets: HashMap<String, HashMap<String, f64>>,
    offline: bool,
}

impl Inner {
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.kv.get(key).is_some_and(|e| !e.is_live(now)) {
            self.kv.remove(key);
        }
        self.kv.get_mut(key)
    }
}

/// Process-local shared store.
///
/// [`MemoryStore::set_offline`] makes every call fail as unavailable, which
/// lets tests exercise store outages.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock_inner().offline = offline;
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn online(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.lock_inner();
        if inner.offline {
            return Err(StorageError::Unavailable("memory store is offline".into()));
        }
        Ok(inner)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.online().map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.online()?;
        Ok(inner.live(key, Instant::now()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.online()?;
        let expires_at = ttl.map(|t| Instant::now() + t);
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.online()?;
        let now = Instant::now();
        if inner.live(key, now).is_some() {
            return Ok(false);
        }
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut inner = self.online()?;
        if inner.live(key, Instant::now()).is_some_and(|e| e.value == expected) {
            inner.kv.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.online()?;
        let now = Instant::now();
        match inner.live(key, now) {
            Some(entry) if entry.value == expected => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.online()?;
        let existed = inner.live(key, Instant::now()).is_some();
        inner.kv.remove(key);
        Ok(existed)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut inner = self.online()?;
        let now = Instant::now();
        Ok(match inner.live(key, now) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        })
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.online()?;
        let now = Instant::now();
        Ok(inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.online()?;
        inner.kv.clear();
        inner.zsets.clear();
        Ok(())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut inner = self.online()?;
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        let inner = self.online()?;
        let mut rows: Vec<(String, f64)> = inner
            .zsets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, s)| **s >= min && **s <= max)
                    .map(|(m, s)| (m.clone(), *s))
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(rows)
    }

    async fn zremrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut inner = self.online()?;
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|_, s| *s < min || *s > max);
        let removed = (before - set.len()) as u64;
        if set.is_empty() {
            inner.zsets.remove(key);
        }
        Ok(removed)
    }
}
