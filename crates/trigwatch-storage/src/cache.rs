//! Per-process metadata caches.
//!
//! A [`TtlCache`] is a best-effort accelerator: entries expire a fixed time
//! after their last write and are removed lazily on read or by a periodic
//! sweep. Nothing in it is authoritative, a miss always falls back to the
//! shared store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

/// String-keyed map whose entries expire `expiry` after their last write.
/// `expiry: None` keeps entries until explicitly deleted.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trigwatch_storage::TtlCache;
///
/// let cache = TtlCache::new("retention", Some(Duration::from_secs(60)));
/// cache.set("servers.web-01.cpu", 60_i64);
/// assert_eq!(cache.get("servers.web-01.cpu"), Some(60));
/// assert!(cache.delete("servers.web-01.cpu"));
/// assert_eq!(cache.get("servers.web-01.cpu"), None);
/// ```
pub struct TtlCache<V> {
    name: &'static str,
    expiry: Option<Duration>,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    pub fn new(name: &'static str, expiry: Option<Duration>) -> Self {
        Self {
            name,
            expiry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn expiry(&self) -> Option<Duration> {
        self.expiry
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock_entries();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at.map_or(true, |at| at > now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: V) {
        let expires_at = self.expiry.map(|e| Instant::now() + e);
        self.lock_entries()
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock_entries().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at.map_or(true, |at| at > now));
        before - entries.len()
    }

    /// Sweep every `every` on the current tokio runtime until the cache is
    /// dropped. Returns `None` outside a runtime or for a cache without
    /// expiry.
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        self.expiry?;
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let weak = Arc::downgrade(self);
        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    tracing::debug!(cache = cache.name, removed, "Cache sweep");
                }
            }
        }))
    }
}
