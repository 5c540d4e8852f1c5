use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use trigwatch_common::context::OpContext;
use trigwatch_common::error::ErrorKind;
use trigwatch_common::problem::{does_any_tree_have_error, ProblemKind};
use trigwatch_common::types::{Trigger, TriggerType};
use trigwatch_expr::TimeSeries;
use trigwatch_source::{
    FetchedSeries, MemoryMetricStore, MetricSource, SourceError, SourceKind, SourceProvider,
};

use crate::{verify_targets, BindError, TriggerBinder, VerifyError};

const NOW: i64 = 100_000;
const TTL: Duration = Duration::from_secs(600);

/// Remote stand-in answering every fetch with a fixed outcome.
struct FakeRemote {
    outcome: Result<Vec<TimeSeries>, SourceError>,
}

#[async_trait]
impl MetricSource for FakeRemote {
    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    async fn fetch(
        &self,
        _ctx: &OpContext,
        from: i64,
        until: i64,
        target: &str,
    ) -> trigwatch_source::Result<FetchedSeries> {
        let series = self.outcome.clone()?;
        Ok(FetchedSeries {
            target: target.to_string(),
            from,
            until,
            series,
        })
    }
}

fn store_with_fresh_cpu() -> Arc<MemoryMetricStore> {
    let store = Arc::new(MemoryMetricStore::new());
    store.add_point("servers.web-01.cpu", NOW - 60, 42.0);
    store.add_point("servers.web-02.cpu", NOW - 60, 40.0);
    store.add_point("servers.old.disk", NOW - 7_200, 1.0);
    store
}

fn local_provider() -> SourceProvider {
    SourceProvider::from_config(store_with_fresh_cpu(), &Default::default()).unwrap()
}

fn remote_provider(outcome: Result<Vec<TimeSeries>, SourceError>) -> SourceProvider {
    local_provider().with_remote(Arc::new(FakeRemote { outcome }))
}

fn targets(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

fn trigger(list: &[&str]) -> Trigger {
    let mut t = Trigger::new("cpu high", targets(list));
    t.tags = vec!["prod".into()];
    t.warn_value = Some(80.0);
    t.error_value = Some(90.0);
    t
}

#[tokio::test]
async fn unparsable_targets_have_parse_error_root() {
    let provider = local_provider();
    for target in ["sumSeries(a.b", "a.{b", "", "f(a,,b)", "'quoted'"] {
        let ctx = OpContext::background();
        let trees = verify_targets(&provider, &ctx, &targets(&[target]), TTL, false, NOW)
            .await
            .unwrap();
        assert_eq!(trees[0].tree.kind, ProblemKind::ParseError, "target {target:?}");
        assert!(!trees[0].syntax_ok);
        assert!(does_any_tree_have_error(&trees));
    }
}

#[tokio::test]
async fn known_functions_pass_without_any_data() {
    let provider = SourceProvider::from_config(
        Arc::new(MemoryMetricStore::new()),
        &Default::default(),
    )
    .unwrap();
    let list = targets(&[
        "servers.*.cpu",
        "sumSeries(servers.*.cpu)",
        "movingAverage(scale(a.b, 2), '10min')",
        "alias(diffSeries(a.b, c.d), 'delta')",
    ]);
    let ctx = OpContext::background();
    let trees = verify_targets(&provider, &ctx, &list, TTL, false, NOW).await.unwrap();
    assert!(!does_any_tree_have_error(&trees));
    for tree in &trees {
        assert!(tree.tree.count(ProblemKind::NoData) >= 1, "{}", tree.target);
    }
}

#[tokio::test]
async fn fresh_local_data_yields_clean_tree() {
    let trees = verify_targets(
        &local_provider(),
        &OpContext::background(),
        &targets(&["sumSeries(servers.web-*.cpu)"]),
        TTL,
        false,
        NOW,
    )
    .await
    .unwrap();
    assert_eq!(trees[0].tree.kind, ProblemKind::Ok);
    assert!(trees[0].tree.problems.is_empty());
}

#[tokio::test]
async fn stale_pattern_gets_no_data_warning() {
    let trees = verify_targets(
        &local_provider(),
        &OpContext::background(),
        &targets(&["sumSeries(servers.web-01.cpu, servers.old.disk)"]),
        TTL,
        false,
        NOW,
    )
    .await
    .unwrap();
    let tree = &trees[0].tree;
    assert!(trees[0].is_passing());
    assert_eq!(tree.problems.len(), 1);
    assert_eq!(tree.problems[0].kind, ProblemKind::NoData);
    assert_eq!(tree.problems[0].argument, "servers.old.disk");
    assert_eq!(tree.problems[0].position, 30);
}

#[tokio::test]
async fn unknown_functions_are_errors() {
    let provider = local_provider();
    let trees = verify_targets(
        &provider,
        &OpContext::background(),
        &targets(&["nope(a.b)", "scale(nope(a.b), 2)"]),
        TTL,
        false,
        NOW,
    )
    .await
    .unwrap();
    assert_eq!(trees[0].tree.kind, ProblemKind::UnknownFunctionError);
    assert_eq!(trees[0].tree.argument, "nope");
    assert_eq!(trees[1].tree.kind, ProblemKind::Ok);
    let child = trees[1].tree.first_error().unwrap();
    assert_eq!(child.kind, ProblemKind::UnknownFunctionError);
    assert_eq!(child.position, 6);
}

#[tokio::test]
async fn eval_errors_are_reported_below_root() {
    let trees = verify_targets(
        &local_provider(),
        &OpContext::background(),
        &targets(&["scale(servers.web-01.cpu, 'x')"]),
        TTL,
        false,
        NOW,
    )
    .await
    .unwrap();
    let err = trees[0].tree.first_error().unwrap();
    assert_eq!(err.kind, ProblemKind::EvalError);
    assert_eq!(err.argument, "scale");
    assert!(!trees[0].is_passing());
}

#[tokio::test]
async fn unstable_functions_warn_only() {
    let trees = verify_targets(
        &local_provider(),
        &OpContext::background(),
        &targets(&["highestCurrent(servers.*.cpu, 1)"]),
        TTL,
        false,
        NOW,
    )
    .await
    .unwrap();
    assert!(trees[0].is_passing());
    assert_eq!(trees[0].tree.count(ProblemKind::UnstableFunction), 1);
}

#[tokio::test]
async fn remote_failures_keep_their_kind() {
    let cases = [
        (
            SourceError::RemoteUnavailable {
                timeout: Duration::from_secs(60),
                path: "/render".into(),
                cause: "timed out".into(),
            },
            ProblemKind::RemoteUnavailable,
        ),
        (
            SourceError::RemoteBadResponse {
                status: 500,
                body: "boom".into(),
            },
            ProblemKind::RemoteBadResponse,
        ),
    ];
    for (error, expected) in cases {
        let provider = remote_provider(Err(error));
        let ctx = OpContext::background();
        let trees = verify_targets(&provider, &ctx, &targets(&["a.b"]), TTL, true, NOW)
            .await
            .unwrap();
        assert_eq!(trees[0].tree.kind, expected);
        assert!(does_any_tree_have_error(&trees));
    }
}

#[tokio::test]
async fn remote_targets_skip_local_function_registry() {
    let series = TimeSeries::new("a.b", NOW - 60, 60, vec![Some(1.0)]);
    let provider = remote_provider(Ok(vec![series]));
    let trees = verify_targets(
        &provider,
        &OpContext::background(),
        &targets(&["remoteOnlyFunction(a.b)"]),
        TTL,
        true,
        NOW,
    )
    .await
    .unwrap();
    assert!(trees[0].is_passing());
    assert!(trees[0].tree.problems.is_empty());
}

#[tokio::test]
async fn remote_without_configuration_fails_whole_call() {
    let ctx = OpContext::background();
    let err = verify_targets(&local_provider(), &ctx, &targets(&["a.b"]), TTL, true, NOW)
        .await
        .unwrap_err();
    assert_eq!(err, VerifyError::SourceNotConfigured);
}

#[tokio::test]
async fn binder_collects_series_names() {
    let provider = local_provider();
    let bound = TriggerBinder::new(&provider, NOW)
        .bind(&OpContext::background(), trigger(&["servers.*.cpu", "servers.old.disk"]))
        .await
        .unwrap();
    assert_eq!(
        bound.time_series_names["t1"],
        vec!["servers.web-01.cpu".to_string(), "servers.web-02.cpu".to_string()]
    );
    assert_eq!(bound.time_series_names["t2"], vec!["servers.old.disk".to_string()]);
}

#[tokio::test]
async fn binder_rejects_bad_shapes() {
    let provider = local_provider();
    let binder = TriggerBinder::new(&provider, NOW);

    let mut no_tags = trigger(&["a.b"]);
    no_tags.tags.clear();
    let mut blank_name = trigger(&["a.b"]);
    blank_name.name = "  ".into();
    let mut bad_template = trigger(&["a.b"]);
    bad_template.desc = Some("{{trigger_name".into());
    let mut no_targets = trigger(&[]);
    no_targets.targets.clear();

    for t in [no_tags, blank_name, bad_template, no_targets] {
        let err = binder.bind(&OpContext::background(), t).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{err}");
    }
}

#[tokio::test]
async fn binder_checks_levels_and_expressions() {
    let provider = local_provider();
    let binder = TriggerBinder::new(&provider, NOW);

    let mut inverted = trigger(&["a.b"]);
    inverted.warn_value = Some(95.0);
    let mut falling = trigger(&["a.b"]);
    falling.trigger_type = TriggerType::Falling;
    let mut no_levels = trigger(&["a.b"]);
    no_levels.warn_value = None;
    no_levels.error_value = None;
    let mut out_of_range = trigger(&["a.b", "c.d"]);
    out_of_range.trigger_type = TriggerType::Expression;
    out_of_range.expression = Some("(t1 > 10 && t3 < 5) ? ERROR : OK".into());
    let mut unbalanced = trigger(&["a.b"]);
    unbalanced.trigger_type = TriggerType::Expression;
    unbalanced.expression = Some("(t1 > 10 ? ERROR : OK".into());

    for t in [inverted, falling, no_levels, out_of_range, unbalanced] {
        let err = binder.bind(&OpContext::background(), t).await.unwrap_err();
        assert!(matches!(err, BindError::InvalidExpression(_)), "{err}");
        assert!(err.is_target_problem());
    }

    let mut valid = trigger(&["a.b", "c.d"]);
    valid.trigger_type = TriggerType::Expression;
    valid.expression = Some("t1 > t2 ? WARN : OK".into());
    assert!(binder.bind(&OpContext::background(), valid).await.is_ok());
}

#[tokio::test]
async fn binder_propagates_fetch_errors() {
    let provider = local_provider();
    let binder = TriggerBinder::new(&provider, NOW);
    let ctx = OpContext::background();
    let err = binder.bind(&ctx, trigger(&["sumSeries(a.b"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseError);
    assert!(err.is_target_problem());

    let mut remote = trigger(&["a.b"]);
    remote.is_remote = true;
    let err = binder.bind(&ctx, remote).await.unwrap_err();
    assert_eq!(err, BindError::Source(SourceError::RemoteNotConfigured));
    assert!(!err.is_target_problem());
}

#[tokio::test]
async fn oversized_moving_window_is_an_eval_error() {
    let trees = verify_targets(
        &local_provider(),
        &OpContext::background(),
        &targets(&[
            "movingAverage(servers.web-01.cpu, 1e19)",
            "movingAverage(servers.web-01.cpu, 5)",
        ]),
        TTL,
        false,
        NOW,
    )
    .await
    .unwrap();
    let err = trees[0].tree.first_error().unwrap();
    assert_eq!(err.kind, ProblemKind::EvalError);
    assert_eq!(err.argument, "movingAverage");
    assert!(trees[1].is_passing());
}

/// Remote stand-in that never answers within a test's patience.
struct HangingRemote;

#[async_trait]
impl MetricSource for HangingRemote {
    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    async fn fetch(
        &self,
        ctx: &OpContext,
        _from: i64,
        _until: i64,
        _target: &str,
    ) -> trigwatch_source::Result<FetchedSeries> {
        let budget = ctx.bound(Duration::from_secs(30));
        tokio::time::sleep(budget).await;
        Err(SourceError::RemoteUnavailable {
            timeout: budget,
            path: "/render".into(),
            cause: "request deadline exceeded".into(),
        })
    }
}

#[tokio::test]
async fn verification_stops_at_the_request_deadline() {
    let provider = local_provider().with_remote(Arc::new(HangingRemote));
    let ctx = OpContext::with_timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    let trees = verify_targets(&provider, &ctx, &targets(&["a.b"]), TTL, true, NOW)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(trees[0].tree.kind, ProblemKind::RemoteUnavailable);
}
