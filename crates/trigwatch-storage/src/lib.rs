//! Distributed state for trigwatch processes.
//!
//! [`Database`] wraps one or more [`SharedStore`] pools and provides the
//! per-process metadata caches, lease-based [`DistributedMutex`]es, search
//! pagers, trigger records and locally ingested metric data. Every store
//! call is bounded by the caller's [`OpContext`] deadline and the configured
//! operation timeout.

pub mod cache;
pub mod database;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod pager;
pub mod store;
pub mod triggers;

#[cfg(test)]
mod tests;

pub use cache::TtlCache;
pub use trigwatch_common::context::OpContext;
pub use database::{Database, DatabaseConfig, DbSource};
pub use error::{Result, StorageError};
pub use lock::{DistributedMutex, LockOptions, MutexGuard};
pub use metrics::DEFAULT_RETENTION_SECS;
pub use pager::Pager;
pub use store::{KeyTtl, MemoryStore, SharedStore, SqliteStore};
