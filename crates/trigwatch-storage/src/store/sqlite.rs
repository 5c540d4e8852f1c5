use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::{Result, StorageError};
use crate::store::{KeyTtl, SharedStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);

CREATE TABLE IF NOT EXISTS zset (
    key TEXT NOT NULL,
    member TEXT NOT NULL,
    score REAL NOT NULL,
    PRIMARY KEY (key, member)
);
CREATE INDEX IF NOT EXISTS idx_zset_key_score ON zset(key, score);
";

/// Milliseconds another process may hold the write lock before a call fails.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Shared store backed by a single SQLite database file.
///
/// Expiry is stored as wall-clock milliseconds so every process opening the
/// same file agrees on it. Calls run on the blocking pool.
pub struct SqliteStore {
    name: String,
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "Shared store opened");
        Ok(Self {
            name: format!("sqlite:{}", path.display()),
            path: path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl SharedStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            )?;
            Ok(stmt
                .query_row(params![key, now_ms()], |row| row.get(0))
                .optional()?)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.call(move |conn| {
            let now = now_ms();
            if ttl.is_some() {
                conn.prepare_cached("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1")?
                    .execute(params![now])?;
            }
            conn.prepare_cached(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            )?
            .execute(params![key, value, ttl.map(expiry_ms)])?;
            Ok(())
        })
        .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let (key, value) = (key.to_string(), value.to_string());
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![key, now_ms()],
            )?;
            let written = tx.execute(
                "INSERT OR IGNORE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expiry_ms(ttl)],
            )?;
            tx.commit()?;
            Ok(written == 1)
        })
        .await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let (key, expected) = (key.to_string(), expected.to_string());
        self.call(move |conn| {
            let n = conn
                .prepare_cached(
                    "DELETE FROM kv WHERE key = ?1 AND value = ?2
                     AND (expires_at IS NULL OR expires_at > ?3)",
                )?
                .execute(params![key, expected, now_ms()])?;
            Ok(n == 1)
        })
        .await
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let (key, expected) = (key.to_string(), expected.to_string());
        self.call(move |conn| {
            let n = conn
                .prepare_cached(
                    "UPDATE kv SET expires_at = ?3 WHERE key = ?1 AND value = ?2
                     AND (expires_at IS NULL OR expires_at > ?4)",
                )?
                .execute(params![key, expected, expiry_ms(ttl), now_ms()])?;
            Ok(n == 1)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.call(move |conn| {
            let n = conn
                .prepare_cached(
                    "DELETE FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                )?
                .execute(params![key, now_ms()])?;
            Ok(n == 1)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let key = key.to_string();
        self.call(move |conn| {
            let expires: Option<Option<i64>> = conn
                .prepare_cached("SELECT expires_at FROM kv WHERE key = ?1")?
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            let now = now_ms();
            Ok(match expires {
                None => KeyTtl::Missing,
                Some(None) => KeyTtl::Persistent,
                Some(Some(at)) if at <= now => KeyTtl::Missing,
                Some(Some(at)) => KeyTtl::Expires(Duration::from_millis((at - now) as u64)),
            })
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1
                 AND (expires_at IS NULL OR expires_at > ?2) ORDER BY key",
            )?;
            let keys = stmt
                .query_map(params![prefix, now_ms()], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn flush(&self) -> Result<()> {
        self.call(|conn| {
            conn.execute_batch("DELETE FROM kv; DELETE FROM zset;")?;
            Ok(())
        })
        .await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let (key, member) = (key.to_string(), member.to_string());
        self.call(move |conn| {
            conn.prepare_cached(
                "INSERT INTO zset (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
            )?
            .execute(params![key, member, score])?;
            Ok(())
        })
        .await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        let key = key.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT member, score FROM zset WHERE key = ?1 AND score >= ?2 AND score <= ?3
                 ORDER BY score, member",
            )?;
            let rows = stmt
                .query_map(params![key, min, max], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<(String, f64)>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn zremrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let key = key.to_string();
        self.call(move |conn| {
            let n = conn
                .prepare_cached("DELETE FROM zset WHERE key = ?1 AND score >= ?2 AND score <= ?3")?
                .execute(params![key, min, max])?;
            Ok(n as u64)
        })
        .await
    }
}
