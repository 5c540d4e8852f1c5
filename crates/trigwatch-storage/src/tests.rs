use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use trigwatch_common::error::ErrorKind;
use trigwatch_common::types::{MetricPoint, Trigger};

use crate::{
    Database, DatabaseConfig, DbSource, KeyTtl, LockOptions, MemoryStore, OpContext, Pager,
    SharedStore, SqliteStore, StorageError, TtlCache, DEFAULT_RETENTION_SECS,
};

fn ctx() -> OpContext {
    OpContext::with_timeout(Duration::from_secs(5))
}

fn sqlite_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("state").join("shared.db")).unwrap();
    (dir, Arc::new(store))
}

fn fast_lock() -> LockOptions {
    LockOptions {
        lease: Duration::from_secs(2),
        tries: 3,
        min_retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(20),
    }
}

fn db_over(pools: Vec<Arc<dyn SharedStore>>) -> Database {
    Database::new(
        pools,
        DatabaseConfig {
            source: DbSource::Test,
            lock: fast_lock(),
            ..Default::default()
        },
    )
    .unwrap()
}

fn point(metric: &str, timestamp: i64, value: f64) -> MetricPoint {
    MetricPoint {
        metric: metric.to_string(),
        timestamp,
        value,
        retention: 10,
    }
}

/// Behaviour every backend must share.
async fn exercise_store(store: &dyn SharedStore) {
    store.ping().await.unwrap();
    assert_eq!(store.get("a").await.unwrap(), None);

    store.set("a", "1", None).await.unwrap();
    assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.ttl("a").await.unwrap(), KeyTtl::Persistent);

    assert!(!store.set_nx("a", "2", Duration::from_secs(5)).await.unwrap());
    assert!(store.set_nx("b", "2", Duration::from_secs(5)).await.unwrap());
    assert!(matches!(store.ttl("b").await.unwrap(), KeyTtl::Expires(d) if d <= Duration::from_secs(5)));

    assert!(!store.compare_and_delete("b", "wrong").await.unwrap());
    assert!(store.compare_and_expire("b", "2", Duration::from_secs(60)).await.unwrap());
    assert!(matches!(store.ttl("b").await.unwrap(), KeyTtl::Expires(d) if d > Duration::from_secs(5)));
    assert!(store.compare_and_delete("b", "2").await.unwrap());
    assert_eq!(store.ttl("b").await.unwrap(), KeyTtl::Missing);

    store.set("p:2", "x", None).await.unwrap();
    store.set("p:1", "x", None).await.unwrap();
    store.set("q:1", "x", None).await.unwrap();
    assert_eq!(store.scan_prefix("p:").await.unwrap(), vec!["p:1", "p:2"]);

    assert!(store.delete("a").await.unwrap());
    assert!(!store.delete("a").await.unwrap());

    store.zadd("z", 3.0, "c").await.unwrap();
    store.zadd("z", 1.0, "a").await.unwrap();
    store.zadd("z", 2.0, "b").await.unwrap();
    store.zadd("z", 4.0, "a").await.unwrap();
    let rows = store.zrange_by_score("z", 2.0, f64::INFINITY).await.unwrap();
    assert_eq!(
        rows,
        vec![("b".to_string(), 2.0), ("c".to_string(), 3.0), ("a".to_string(), 4.0)]
    );
    assert_eq!(store.zremrange_by_score("z", f64::NEG_INFINITY, 3.0).await.unwrap(), 2);
    assert_eq!(store.zrange_by_score("z", 0.0, 10.0).await.unwrap().len(), 1);

    store.flush().await.unwrap();
    assert!(store.scan_prefix("").await.unwrap().is_empty());
    assert!(store.zrange_by_score("z", 0.0, 10.0).await.unwrap().is_empty());
}

#[tokio::test]
async fn memory_store_operations() {
    exercise_store(&MemoryStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_operations() {
    let (_dir, store) = sqlite_store();
    exercise_store(store.as_ref()).await;
}

#[tokio::test]
async fn expired_keys_are_gone() {
    let (_dir, sqlite) = sqlite_store();
    let memory = MemoryStore::new();
    for store in [sqlite.as_ref() as &dyn SharedStore, &memory] {
        assert!(store.set_nx("k", "v", Duration::from_millis(30)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None, "{}", store.name());
        assert!(store.set_nx("k", "w", Duration::from_secs(5)).await.unwrap());
    }
}

#[tokio::test]
async fn sqlite_file_is_shared_between_handles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.db");
    let first = SqliteStore::open(&path).unwrap();
    let second = SqliteStore::open(&path).unwrap();
    assert!(first.set_nx("lock:x", "a", Duration::from_secs(5)).await.unwrap());
    assert!(!second.set_nx("lock:x", "b", Duration::from_secs(5)).await.unwrap());
    assert_eq!(second.get("lock:x").await.unwrap().as_deref(), Some("a"));
}

#[test]
fn cache_entries_expire_and_sweep() {
    let cache = TtlCache::new("metrics", Some(Duration::from_millis(20)));
    cache.set("a", 1);
    cache.set("b", 2);
    assert_eq!(cache.get("a"), Some(1));
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.sweep(), 1);
    assert!(cache.is_empty());
}

#[test]
fn marker_cache_never_expires() {
    let cache = TtlCache::new("retention_saved", None);
    cache.set("servers.web-01.cpu", true);
    assert_eq!(cache.sweep(), 0);
    assert_eq!(cache.get("servers.web-01.cpu"), Some(true));
    assert!(cache.delete("servers.web-01.cpu"));
    assert!(!cache.delete("servers.web-01.cpu"));
}

#[tokio::test]
async fn janitor_sweeps_and_stops_with_cache() {
    let cache = Arc::new(TtlCache::new("retention", Some(Duration::from_millis(10))));
    cache.set("a", 1);
    let janitor = cache.spawn_janitor(Duration::from_millis(20)).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.len(), 0);
    drop(cache);
    tokio::time::timeout(Duration::from_secs(1), janitor)
        .await
        .unwrap()
        .unwrap();

    let marker: Arc<TtlCache<bool>> = Arc::new(TtlCache::new("retention_saved", None));
    assert!(marker.spawn_janitor(Duration::from_millis(20)).is_none());
}

#[test]
fn database_requires_a_pool() {
    let err = Database::new(Vec::new(), DatabaseConfig::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InternalError);
}

#[tokio::test]
async fn offline_store_is_backing_store_unavailable() {
    let store = Arc::new(MemoryStore::new());
    let db = db_over(vec![store.clone()]);
    store.set_offline(true);
    let err = db.ping(&ctx()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackingStoreUnavailable);
    let err = db.get_pager(&ctx(), "p").await.unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
}

#[tokio::test]
async fn expired_context_times_out() {
    let db = Database::new_test();
    let expired = OpContext::with_timeout(Duration::ZERO);
    let err = db.ping(&expired).await.unwrap_err();
    assert!(matches!(err, StorageError::Timeout(_)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::BackingStoreUnavailable);
    assert!(db.ping(&OpContext::background()).await.is_ok());
}

#[tokio::test]
async fn two_contenders_one_winner() {
    let (_dir, store) = sqlite_store();
    let db = Arc::new(db_over(vec![store]));

    let a = db.new_mutex("trigger-create:abc", Duration::from_secs(2));
    let b = db.new_mutex("trigger-create:abc", Duration::from_secs(2));
    let (ctx_a, ctx_b) = (ctx(), ctx());
    let (ra, rb) = tokio::join!(a.lock(&ctx_a), b.lock(&ctx_b));
    let (mut held, lost) = match (ra, rb) {
        (Ok(g), Err(e)) | (Err(e), Ok(g)) => (g, e),
        other => panic!("expected exactly one winner, got {:?}", other.0.is_ok()),
    };
    assert!(matches!(lost, StorageError::LockNotAcquired { ref name } if name == "trigger-create:abc"));
    assert_eq!(lost.kind(), ErrorKind::Conflict);

    assert!(held.unlock().await.unwrap());
    assert!(!held.unlock().await.unwrap());
    let mut again = b.lock(&ctx()).await.unwrap();
    again.unlock().await.unwrap();
}

#[tokio::test]
async fn lease_is_extended_while_held() {
    let db = db_over(vec![Arc::new(MemoryStore::new())]);
    let lease = Duration::from_millis(300);
    let mut guard = db.new_mutex("checker:1", lease).lock(&ctx()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    match db.key_ttl(&ctx(), "lock:checker:1").await.unwrap() {
        KeyTtl::Expires(left) => assert!(left <= lease),
        other => panic!("lock key should still be leased, got {other:?}"),
    }
    assert!(guard.unlock().await.unwrap());
    assert_eq!(db.key_ttl(&ctx(), "lock:checker:1").await.unwrap(), KeyTtl::Missing);
}

#[tokio::test]
async fn dropped_guard_releases_lock() {
    let db = db_over(vec![Arc::new(MemoryStore::new())]);
    let mutex = db.new_mutex("trigger-update:1", Duration::from_secs(5));
    let guard = mutex.lock(&ctx()).await.unwrap();
    drop(guard);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut guard = mutex.lock(&ctx()).await.unwrap();
    assert!(!guard.token().is_empty());
    guard.unlock().await.unwrap();
}

#[tokio::test]
async fn lock_needs_pool_majority() {
    let pools: Vec<Arc<MemoryStore>> = (0..3).map(|_| Arc::new(MemoryStore::new())).collect();
    let db = db_over(pools.iter().map(|p| p.clone() as Arc<dyn SharedStore>).collect());
    pools[0].set_offline(true);
    let mut guard = db.new_mutex("m", Duration::from_secs(2)).lock(&ctx()).await.unwrap();
    guard.unlock().await.unwrap();

    pools[1].set_offline(true);
    let err = db.new_mutex("m", Duration::from_secs(2)).lock(&ctx()).await.unwrap_err();
    assert!(matches!(err, StorageError::LockNotAcquired { .. }), "{err:?}");

    pools[2].set_offline(true);
    let err = db.new_mutex("m", Duration::from_secs(2)).lock(&ctx()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackingStoreUnavailable);
}

#[tokio::test]
async fn lock_stops_at_deadline() {
    let db = Database::new(
        vec![Arc::new(MemoryStore::new())],
        DatabaseConfig {
            lock: LockOptions {
                tries: 1_000,
                ..fast_lock()
            },
            ..Default::default()
        },
    )
    .unwrap();
    let mutex = db.new_mutex("busy", Duration::from_secs(10));
    let mut held = mutex.lock(&ctx()).await.unwrap();

    let started = std::time::Instant::now();
    let short = OpContext::with_timeout(Duration::from_millis(100));
    let err = mutex.lock(&short).await.unwrap_err();
    assert!(matches!(err, StorageError::LockNotAcquired { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
    held.unlock().await.unwrap();
}

#[tokio::test]
async fn retention_saved_once_per_process() {
    let db = Database::new_test();
    let ctx = ctx();
    db.save_metrics(&ctx, &[point("servers.web-01.cpu", 600, 1.0)])
        .await
        .unwrap();
    assert_eq!(db.retention_saved_cache().get("servers.web-01.cpu"), Some(true));
    assert_eq!(db.metric_retention(&ctx, "servers.web-01.cpu").await.unwrap(), 10);

    let mut changed = point("servers.web-01.cpu", 610, 2.0);
    changed.retention = 30;
    db.save_metrics(&ctx, &[changed]).await.unwrap();
    db.retention_cache().clear();
    assert_eq!(db.metric_retention(&ctx, "servers.web-01.cpu").await.unwrap(), 10);

    assert_eq!(
        db.metric_retention(&ctx, "never.seen").await.unwrap(),
        DEFAULT_RETENTION_SECS
    );
}

#[tokio::test]
async fn metric_points_round_trip_and_trim() {
    let store = Arc::new(MemoryStore::new());
    let db = Database::new(
        vec![store],
        DatabaseConfig {
            metrics_ttl: Duration::from_secs(100),
            ..Default::default()
        },
    )
    .unwrap();
    let ctx = ctx();
    db.save_metrics(
        &ctx,
        &[
            point("servers.web-01.cpu", 100, 1.0),
            point("servers.web-01.cpu", 150, 2.5),
            point("servers.web-01.cpu", 150, 3.5),
            point("servers.web-02.cpu", 150, 4.0),
        ],
    )
    .await
    .unwrap();
    let points = db
        .fetch_metric_points(&ctx, "servers.web-01.cpu", 0, 1_000)
        .await
        .unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[1].value, 3.5);

    db.save_metrics(&ctx, &[point("servers.web-01.cpu", 260, 9.0)])
        .await
        .unwrap();
    let points = db
        .fetch_metric_points(&ctx, "servers.web-01.cpu", 0, 1_000)
        .await
        .unwrap();
    assert_eq!(
        points.iter().map(|p| p.timestamp).collect::<Vec<_>>(),
        vec![260]
    );

    let names = db.match_metric_names(&ctx, "servers.*.cpu").await.unwrap();
    assert_eq!(names, vec!["servers.web-01.cpu", "servers.web-02.cpu"]);
    assert_eq!(db.metrics_cache().get("servers.*.cpu"), Some(names));
}

#[tokio::test]
async fn metrics_cache_hides_new_names_until_expiry() {
    let db = Database::new_test();
    let ctx = ctx();
    db.save_metrics(&ctx, &[point("a.b", 60, 1.0)]).await.unwrap();
    assert_eq!(db.match_metric_names(&ctx, "a.*").await.unwrap(), vec!["a.b"]);
    db.save_metrics(&ctx, &[point("a.c", 60, 1.0)]).await.unwrap();
    assert_eq!(db.match_metric_names(&ctx, "a.*").await.unwrap(), vec!["a.b"]);
    db.metrics_cache().delete("a.*");
    assert_eq!(db.match_metric_names(&ctx, "a.*").await.unwrap(), vec!["a.b", "a.c"]);
}

#[tokio::test]
async fn triggers_are_indexed_by_fingerprint() {
    trigwatch_common::id::init(1, 1);
    let (_dir, store) = sqlite_store();
    let db = db_over(vec![store]);
    let ctx = ctx();

    let mut cpu = Trigger::new("cpu", vec!["servers.*.cpu".into()]);
    cpu.id = trigwatch_common::id::next_id();
    cpu.warn_value = Some(80.0);
    let mut disk = Trigger::new("disk", vec!["servers.*.disk".into()]);
    disk.id = trigwatch_common::id::next_id();
    db.save_trigger(&ctx, &disk).await.unwrap();
    db.save_trigger(&ctx, &cpu).await.unwrap();

    let listed = db.list_triggers(&ctx).await.unwrap();
    assert_eq!(listed.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), ["cpu", "disk"]);
    assert_eq!(
        db.trigger_id_by_fingerprint(&ctx, &cpu.fingerprint()).await.unwrap(),
        Some(cpu.id.clone())
    );

    let old_fingerprint = cpu.fingerprint();
    cpu.warn_value = Some(70.0);
    db.save_trigger(&ctx, &cpu).await.unwrap();
    assert_eq!(db.trigger_id_by_fingerprint(&ctx, &old_fingerprint).await.unwrap(), None);
    assert_eq!(db.get_trigger(&ctx, &cpu.id).await.unwrap().unwrap().warn_value, Some(70.0));

    assert!(db.delete_trigger(&ctx, &cpu.id).await.unwrap());
    assert!(!db.delete_trigger(&ctx, &cpu.id).await.unwrap());
    assert_eq!(db.trigger_id_by_fingerprint(&ctx, &cpu.fingerprint()).await.unwrap(), None);
    assert_eq!(db.list_triggers(&ctx).await.unwrap().len(), 1);
}

#[tokio::test]
async fn pager_persists_with_ttl() {
    let db = Database::new_test();
    let ctx = ctx();
    let ttl = Duration::from_secs(1800);
    let ids: Vec<String> = (0..25).map(|i| format!("t{i:02}")).collect();
    let mut pager = Pager::new("p1", 0, 10, ttl, ids);
    db.save_pager(&ctx, &pager, ttl).await.unwrap();
    assert!(matches!(
        db.key_ttl(&ctx, "trigger-search-pager:p1").await.unwrap(),
        KeyTtl::Expires(left) if left <= ttl
    ));

    pager.advance();
    db.save_pager(&ctx, &pager, ttl).await.unwrap();
    let loaded = db.get_pager(&ctx, "p1").await.unwrap().unwrap();
    assert_eq!(loaded.page, 1);
    assert_eq!(loaded.page_ids().first().map(String::as_str), Some("t10"));
    assert_eq!(loaded.page_count(), 3);
    assert!(loaded.has_next());

    assert!(db.delete_pager(&ctx, "p1").await.unwrap());
    assert!(!db.delete_pager(&ctx, "p1").await.unwrap());
    assert!(!db.delete_pager(&ctx, "never-created").await.unwrap());
    assert_eq!(db.get_pager(&ctx, "p1").await.unwrap(), None);
}

#[test]
fn pager_pages_past_end_are_empty() {
    let mut pager = Pager::new("p", 0, 0, Duration::from_secs(1), vec!["a".into()]);
    assert_eq!(pager.size, 1);
    pager.jump_to(5);
    assert!(pager.page_ids().is_empty());
    assert!(!pager.has_next());
}

#[tokio::test]
async fn flush_clears_store_and_caches() {
    let db = Database::new_test();
    let ctx = ctx();
    db.save_metrics(&ctx, &[point("a.b", 60, 1.0)]).await.unwrap();
    db.flush(&ctx).await.unwrap();
    assert!(db.retention_saved_cache().is_empty());
    assert!(db.match_metric_names(&ctx, "*.*").await.unwrap().is_empty());
    assert!(!db.delete_key(&ctx, "metric-retention:a.b").await.unwrap());
}
