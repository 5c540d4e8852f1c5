#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;
use trigwatch_common::types::MetricPoint;
use trigwatch_server::app;
use trigwatch_server::config::{ServerConfig, StoreBackend};
use trigwatch_server::search::MemorySearchIndex;
use trigwatch_server::state::AppState;
use trigwatch_storage::{
    Database, DbSource, MemoryStore, OpContext, SharedStore, SqliteStore,
};

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: Router,
    /// Set when the context runs on the in-memory store.
    pub memory: Option<Arc<MemoryStore>>,
}

#[derive(Default)]
pub struct TestOptions {
    /// Render endpoint of a fake remote API.
    pub remote_url: Option<String>,
    /// In-memory store instead of a SQLite file, so tests can take it offline.
    pub memory_store: bool,
    /// Request deadline; the configured default when unset.
    pub request_timeout_secs: Option<u64>,
    /// Remote client timeout; two seconds when unset.
    pub remote_timeout_secs: Option<u64>,
}

pub async fn build_test_context() -> Result<TestContext> {
    build_test_context_with(TestOptions::default()).await
}

pub async fn build_test_context_with(options: TestOptions) -> Result<TestContext> {
    trigwatch_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let mut config = ServerConfig::default();
    config.store.path = temp_dir.path().join("trigwatch.db").to_string_lossy().to_string();
    config.lock.lease_secs = 2;
    if let Some(secs) = options.request_timeout_secs {
        config.api.request_timeout_secs = secs;
    }
    if let Some(url) = options.remote_url {
        config.remote.enabled = true;
        config.remote.url = url;
        config.remote.timeout_secs = options.remote_timeout_secs.unwrap_or(2);
    }

    let (store, memory): (Arc<dyn SharedStore>, _) = if options.memory_store {
        config.store.backend = StoreBackend::Memory;
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Some(store))
    } else {
        (Arc::new(SqliteStore::open(&config.store.pool_paths()[0])?), None)
    };
    let db = Arc::new(Database::new(vec![store], config.database_config(DbSource::Test))?);
    let state = AppState::new(config, db, Arc::new(MemorySearchIndex::new()))?;
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
        memory,
    })
}

/// Store one fresh point for each metric.
pub async fn seed_metrics(ctx: &TestContext, metrics: &[&str]) -> Result<()> {
    let now = Utc::now().timestamp();
    let points: Vec<MetricPoint> = metrics
        .iter()
        .map(|m| MetricPoint {
            metric: m.to_string(),
            timestamp: now - 30,
            value: 42.0,
            retention: 60,
        })
        .collect();
    ctx.state
        .db
        .save_metrics(&OpContext::background(), &points)
        .await?;
    Ok(())
}

/// Fake remote render API on a throwaway listener; returns its render URL.
pub async fn serve_remote(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}/render")
}

/// URL of a port nothing listens on.
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    drop(listener);
    format!("http://{addr}/render")
}

pub fn trigger_body(name: &str, targets: &[&str], tags: &[&str]) -> Value {
    json!({
        "name": name,
        "targets": targets,
        "tags": tags,
        "warn_value": 80.0,
        "error_value": 90.0,
    })
}

pub async fn request_json(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-Auth-User", user);
    }
    builder = builder.header("Content-Type", "application/json");

    let req_body = body.unwrap_or(Value::Null).to_string();
    let req = builder
        .body(Body::from(req_body))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-Auth-User", user);
    }
    let req = builder.body(Body::empty()).expect("request should build");
    send(app, req).await
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, json, trace_id)
}

pub fn assert_ok_envelope(body: &Value) {
    assert_eq!(body["err_code"], 0, "unexpected envelope: {body}");
    assert_eq!(body["err_msg"], "success");
    assert!(body["trace_id"].as_str().is_some_and(|t| t.len() == 16));
}

pub fn assert_err_envelope(body: &Value, err_code: i32, status_label: &str) {
    assert_eq!(body["err_code"], err_code, "unexpected envelope: {body}");
    assert_eq!(body["status"], status_label);
    assert!(body["err_msg"].as_str().is_some_and(|m| !m.is_empty()));
}
