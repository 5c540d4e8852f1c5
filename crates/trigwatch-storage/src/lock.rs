//! Lease-based mutual exclusion across processes sharing the store pools.
//!
//! Acquisition writes a random token with `SET NX` semantics on every pool
//! and succeeds once a majority accepted it while the lease is still valid.
//! The holder's lease is extended in the background until released; a
//! crashed holder's lease simply expires.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use trigwatch_common::context::OpContext;
use crate::error::{Result, StorageError};
use crate::store::SharedStore;

pub(crate) type Pools = Arc<Vec<Arc<dyn SharedStore>>>;

/// Acquisition and lease settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub lease: Duration,
    pub tries: u32,
    pub min_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(8),
            tries: 32,
            min_retry_delay: Duration::from_millis(50),
            max_retry_delay: Duration::from_millis(250),
        }
    }
}

/// Named lock handle. Cheap to create; nothing touches the store until
/// [`DistributedMutex::lock`].
pub struct DistributedMutex {
    name: String,
    key: String,
    pools: Pools,
    options: LockOptions,
    op_timeout: Duration,
}

fn quorum(pools: usize) -> usize {
    pools / 2 + 1
}

fn new_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Clock drift allowance subtracted from the lease validity.
fn drift(lease: Duration) -> Duration {
    lease / 100 + Duration::from_millis(2)
}

async fn bounded<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(StorageError::Timeout(limit)))
}

/// Runs `compare_and_delete` on every pool. Returns the number of pools that
/// removed the token and the number that failed.
async fn release_all(pools: &Pools, key: &str, token: &str, op_timeout: Duration) -> (usize, usize) {
    let (mut released, mut failed) = (0, 0);
    for pool in pools.iter() {
        match bounded(op_timeout, pool.compare_and_delete(key, token)).await {
            Ok(true) => released += 1,
            Ok(false) => {}
            Err(e) => {
                failed += 1;
                tracing::warn!(key, store = pool.name(), error = %e, "Lock release failed");
            }
        }
    }
    (released, failed)
}

impl DistributedMutex {
    pub(crate) fn new(name: &str, pools: Pools, options: LockOptions, op_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            key: format!("lock:{name}"),
            pools,
            options,
            op_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquire the lock, retrying after a random delay up to
    /// `options.tries` times and never past the context deadline.
    ///
    /// # Errors
    ///
    /// [`StorageError::Unavailable`] when no pool answered any attempt,
    /// otherwise [`StorageError::LockNotAcquired`] once attempts run out.
    pub async fn lock(&self, ctx: &OpContext) -> Result<MutexGuard> {
        let lease = self.options.lease;
        let needed = quorum(self.pools.len());
        let mut reachable = false;
        let mut last_error = None;

        for attempt in 0..self.options.tries.max(1) {
            if ctx.is_expired() {
                break;
            }
            let token = new_token();
            let started = Instant::now();
            let (mut acquired, mut failed) = (0, 0);
            for pool in self.pools.iter() {
                let op_limit = ctx.bound(self.op_timeout);
                match bounded(op_limit, pool.set_nx(&self.key, &token, lease)).await {
                    Ok(true) => acquired += 1,
                    Ok(false) => {}
                    Err(e) => {
                        failed += 1;
                        last_error = Some(e);
                    }
                }
            }
            reachable |= failed < self.pools.len();

            let spent = started.elapsed() + drift(lease);
            if acquired >= needed && spent < lease {
                tracing::debug!(lock = %self.name, attempt, "Lock acquired");
                return Ok(MutexGuard::new(self, token));
            }
            if acquired > 0 {
                release_all(&self.pools, &self.key, &token, self.op_timeout).await;
            }

            if attempt + 1 < self.options.tries {
                let delay = retry_delay(&self.options);
                if ctx.remaining().is_some_and(|left| left <= delay) {
                    break;
                }
                tokio::time::sleep(delay).await;
            }
        }

        if !reachable {
            if let Some(e) = last_error {
                tracing::warn!(lock = %self.name, error = %e, "Lock store unreachable");
                return Err(StorageError::Unavailable(e.to_string()));
            }
        }
        tracing::info!(lock = %self.name, "Lock not acquired");
        Err(StorageError::LockNotAcquired {
            name: self.name.clone(),
        })
    }
}

fn retry_delay(options: &LockOptions) -> Duration {
    let min = options.min_retry_delay.as_millis() as u64;
    let max = (options.max_retry_delay.as_millis() as u64).max(min);
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// A held lock. Releasing is idempotent; dropping an unreleased guard stops
/// the lease extension and releases in the background.
pub struct MutexGuard {
    name: String,
    key: String,
    token: String,
    pools: Pools,
    op_timeout: Duration,
    extender: Option<JoinHandle<()>>,
    released: bool,
}

impl std::fmt::Debug for MutexGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl MutexGuard {
    fn new(mutex: &DistributedMutex, token: String) -> Self {
        let extender = tokio::spawn(extend_lease(
            mutex.name.clone(),
            mutex.key.clone(),
            token.clone(),
            mutex.pools.clone(),
            mutex.options.lease,
            mutex.op_timeout,
        ));
        Self {
            name: mutex.name.clone(),
            key: mutex.key.clone(),
            token,
            pools: mutex.pools.clone(),
            op_timeout: mutex.op_timeout,
            extender: Some(extender),
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Random value identifying this holder's lease.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock. Returns `false` when it was already released or the
    /// lease had expired meanwhile.
    ///
    /// # Errors
    ///
    /// [`StorageError::Unavailable`] when no pool could be reached.
    pub async fn unlock(&mut self) -> Result<bool> {
        if self.released {
            return Ok(false);
        }
        self.released = true;
        if let Some(extender) = self.extender.take() {
            extender.abort();
        }
        let (released, failed) =
            release_all(&self.pools, &self.key, &self.token, self.op_timeout).await;
        if failed == self.pools.len() {
            return Err(StorageError::Unavailable(format!(
                "cannot release lock '{}'",
                self.name
            )));
        }
        tracing::debug!(lock = %self.name, "Lock released");
        Ok(released > 0)
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        if let Some(extender) = self.extender.take() {
            extender.abort();
        }
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let (pools, key, token, op_timeout) = (
            self.pools.clone(),
            self.key.clone(),
            self.token.clone(),
            self.op_timeout,
        );
        handle.spawn(async move {
            release_all(&pools, &key, &token, op_timeout).await;
        });
    }
}

async fn extend_lease(
    name: String,
    key: String,
    token: String,
    pools: Pools,
    lease: Duration,
    op_timeout: Duration,
) {
    let needed = quorum(pools.len());
    loop {
        tokio::time::sleep(lease / 3).await;
        let mut extended = 0;
        for pool in pools.iter() {
            if let Ok(true) = bounded(op_timeout, pool.compare_and_expire(&key, &token, lease)).await {
                extended += 1;
            }
        }
        if extended < needed {
            tracing::warn!(lock = %name, extended, "Lock lease lost");
            break;
        }
    }
}
