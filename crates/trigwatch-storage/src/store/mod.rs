//! Shared key-value store backends.
//!
//! A [`SharedStore`] is the cross-process system of record: locks, pagers,
//! triggers and local metric data all live here. Two backends ship with the
//! crate: [`SqliteStore`] (one WAL database file shared by every process on a
//! host) and [`MemoryStore`] (process-local, for tests and single-node runs).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(Duration),
}

/// Key-value store with expiring keys and score-ordered sets.
///
/// Every method is a single atomic operation against the store, so two
/// processes racing on [`SharedStore::set_nx`] see exactly one winner.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional write; `None` keeps the key until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write only if the key is absent (or expired). Returns whether it was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete the key only while it still holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Reset the key's TTL only while it still holds `expected`.
    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// Live keys starting with `prefix`, sorted.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove every key and sorted set.
    async fn flush(&self) -> Result<()>;

    /// Insert or re-score `member` in the sorted set at `key`.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;

    /// Members with `min <= score <= max`, ordered by score then member.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>>;

    /// Remove members with `min <= score <= max`. Returns how many were removed.
    async fn zremrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64>;
}
