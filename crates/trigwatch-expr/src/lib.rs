//! Graphite-style target expressions.
//!
//! A target is either a dotted series path (with per-node globs) or a
//! function call over other targets. [`parse`] turns text into an [`Expr`],
//! and an [`Evaluator`] computes it against a [`SeriesResolver`].

pub mod ast;
pub mod error;
pub mod eval;
pub mod functions;
pub mod parser;
pub mod series;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

pub use ast::{Arg, CallSite, Expr};
pub use error::{ExprError, ParseError, Result};
pub use eval::{fetch_windows, Evaluator, FetchWindow, SeriesResolver, Value};
pub use parser::parse;
pub use series::TimeSeries;

/// Series already fetched for a set of windows, keyed by pattern and range.
///
/// Async sources fetch every [`FetchWindow`] up front and evaluation then
/// runs synchronously over this map.
#[derive(Debug, Default, Clone)]
pub struct PrefetchedResolver {
    series: HashMap<(String, i64, i64), Vec<TimeSeries>>,
}

impl PrefetchedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, window: &FetchWindow, series: Vec<TimeSeries>) {
        self.series
            .insert((window.pattern.clone(), window.from, window.until), series);
    }
}

impl SeriesResolver for PrefetchedResolver {
    fn resolve(&self, pattern: &str, from: i64, until: i64) -> Vec<TimeSeries> {
        self.series
            .get(&(pattern.to_string(), from, until))
            .cloned()
            .unwrap_or_default()
    }
}

/// Answers every pattern with a single one-point series valued `1.0` at
/// `now`. Used to dry-run local targets without touching storage.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticResolver {
    pub now: i64,
}

impl SyntheticResolver {
    pub const STEP: i64 = 60;

    pub fn new(now: i64) -> Self {
        Self { now }
    }
}

impl SeriesResolver for SyntheticResolver {
    fn resolve(&self, pattern: &str, _from: i64, _until: i64) -> Vec<TimeSeries> {
        let start = self.now - self.now.rem_euclid(Self::STEP);
        tracing::trace!(pattern, start, "synthetic series");
        vec![TimeSeries::new(pattern, start, Self::STEP, vec![Some(1.0)])]
    }
}
