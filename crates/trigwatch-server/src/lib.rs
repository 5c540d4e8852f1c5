//! HTTP surface of trigwatch: trigger create / update / check, paginated
//! search with stored pagers, and the wiring of storage, sources and the
//! search index behind it.

pub mod api;
pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod local_metrics;
pub mod logging;
pub mod middleware;
pub mod openapi;
pub mod search;
pub mod state;
