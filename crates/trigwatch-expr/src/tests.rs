use crate::functions::{self, parse_interval};
use crate::series::pattern_matches;
use crate::{
    fetch_windows, parse, Evaluator, Expr, ExprError, FetchWindow, PrefetchedResolver,
    SeriesResolver, SyntheticResolver, TimeSeries,
};
use trigwatch_common::error::ErrorKind;

struct StaticResolver {
    series: Vec<TimeSeries>,
}

impl SeriesResolver for StaticResolver {
    fn resolve(&self, pattern: &str, _from: i64, _until: i64) -> Vec<TimeSeries> {
        self.series
            .iter()
            .filter(|s| pattern_matches(pattern, &s.name))
            .cloned()
            .collect()
    }
}

fn ts(name: &str, values: &[Option<f64>]) -> TimeSeries {
    TimeSeries::new(name, 0, 60, values.to_vec())
}

fn servers() -> StaticResolver {
    StaticResolver {
        series: vec![
            ts("servers.web-01.cpu", &[Some(10.0), Some(20.0), Some(30.0)]),
            ts("servers.web-02.cpu", &[Some(5.0), None, Some(15.0)]),
            ts("servers.db-01.cpu", &[Some(50.0), Some(60.0), Some(70.0)]),
        ],
    }
}

fn eval(target: &str) -> Result<Vec<TimeSeries>, ExprError> {
    let resolver = servers();
    let expr = parse(target)?;
    Evaluator::new(&resolver, 0, 180).eval(&expr)
}

// ---- parser ----

#[test]
fn parses_plain_path() {
    let expr = parse("servers.web-01.cpu").unwrap();
    assert_eq!(
        expr,
        Expr::Path {
            pattern: "servers.web-01.cpu".into(),
            position: 0
        }
    );
}

#[test]
fn parses_nested_calls_with_keywords() {
    let expr = parse("alias(sumSeries(a.*, b.{x,y}), newName='total')").unwrap();
    let calls = expr.functions();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].name, "alias");
    assert_eq!(calls[0].depth, 0);
    assert_eq!(calls[1].name, "sumSeries");
    assert_eq!(calls[1].position, 6);
    assert_eq!(calls[1].depth, 1);
    assert_eq!(expr.paths(), vec!["a.*".to_string(), "b.{x,y}".to_string()]);
    let Expr::Call { args, .. } = &expr else {
        panic!("expected call");
    };
    assert_eq!(args[1].name.as_deref(), Some("newName"));
}

#[test]
fn parses_literals_as_arguments() {
    let expr = parse("f(a.b, -1.5, \"it\\\"s\", true)").unwrap();
    let Expr::Call { args, .. } = expr else {
        panic!("expected call");
    };
    assert!(matches!(args[1].value, Expr::Number { value, .. } if value == -1.5));
    assert!(matches!(&args[2].value, Expr::Str { value, .. } if value == "it\"s"));
    assert!(matches!(args[3].value, Expr::Bool { value: true, .. }));
}

#[test]
fn rejects_malformed_targets() {
    let cases = [
        ("", 0, "empty target"),
        ("   ", 0, "empty target"),
        ("sumSeries(a.b", 13, "missing ')'"),
        ("a.b)", 3, "unexpected ')'"),
        ("a.{b,c", 0, "unclosed '{'"),
        ("f(a.b c)", 6, "expected ',' or ')', found 'c'"),
        ("f('abc)", 2, "unterminated string"),
        ("42", 0, "target must be a series path or a function call"),
        ("1bad(a)", 0, "invalid function name '1bad'"),
    ];
    for (target, position, message) in cases {
        let err = parse(target).unwrap_err();
        assert_eq!(err.position, position, "target {target:?}");
        assert_eq!(err.message, message, "target {target:?}");
    }
}

#[test]
fn parse_error_maps_to_parse_kind() {
    let err: ExprError = parse("f(").unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::ParseError);
}

// ---- patterns ----

#[test]
fn pattern_matching_is_per_node() {
    assert!(pattern_matches("a.*.c", "a.b.c"));
    assert!(!pattern_matches("a.*", "a.b.c"));
    assert!(pattern_matches("a.b?.c", "a.bx.c"));
    assert!(pattern_matches("a.{b,d}.c", "a.d.c"));
    assert!(!pattern_matches("a.b.c", "a.b.cd"));
}

// ---- evaluation ----

#[test]
fn sum_series_skips_nulls() {
    let out = eval("sumSeries(servers.web-*.cpu)").unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].name, "sumSeries(servers.web-*.cpu)");
    assert_eq!(out[0].values, vec![Some(15.0), Some(20.0), Some(45.0)]);
}

#[test]
fn average_and_max_series() {
    let avg = eval("averageSeries(servers.*.cpu)").unwrap();
    assert_eq!(avg[0].values[0], Some(65.0 / 3.0));
    assert_eq!(avg[0].values[1], Some(40.0));
    let max = eval("maxSeries(servers.*.cpu)").unwrap();
    assert_eq!(max[0].values, vec![Some(50.0), Some(60.0), Some(70.0)]);
}

#[test]
fn scale_and_alias_compose() {
    let out = eval("alias(scale(servers.db-01.cpu, 0.5), 'db')").unwrap();
    assert_eq!(out[0].name, "db");
    assert_eq!(out[0].values, vec![Some(25.0), Some(30.0), Some(35.0)]);
}

#[test]
fn alias_by_node_supports_negative_index() {
    let out = eval("aliasByNode(servers.*.cpu, 1)").unwrap();
    let names: Vec<_> = out.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["web-01", "web-02", "db-01"]);
    let out = eval("aliasByNode(scale(servers.db-01.cpu, 2), -1)").unwrap();
    assert_eq!(out[0].name, "cpu");
}

#[test]
fn divide_series_requires_single_divisor() {
    let err = eval("divideSeries(servers.db-01.cpu, servers.web-*.cpu)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EvalError);
    let out = eval("divideSeries(servers.db-01.cpu, servers.web-01.cpu)").unwrap();
    assert_eq!(out[0].values[0], Some(5.0));
}

#[test]
fn derivative_and_keep_last_value() {
    let out = eval("derivative(servers.web-01.cpu)").unwrap();
    assert_eq!(out[0].values, vec![None, Some(10.0), Some(10.0)]);
    let out = eval("keepLastValue(servers.web-02.cpu)").unwrap();
    assert_eq!(out[0].values, vec![Some(5.0), Some(5.0), Some(15.0)]);
}

#[test]
fn moving_average_accepts_points_and_intervals() {
    let by_points = eval("movingAverage(servers.web-01.cpu, 2)").unwrap();
    assert_eq!(by_points[0].values, vec![Some(10.0), Some(15.0), Some(25.0)]);
    let by_interval = eval("movingAverage(servers.web-01.cpu, '2min')").unwrap();
    assert_eq!(by_interval[0].values, by_points[0].values);
}

#[test]
fn moving_windows_are_bounded() {
    let wide = eval("movingAverage(servers.web-01.cpu, 10)").unwrap();
    assert_eq!(wide[0].values, vec![Some(10.0), Some(15.0), Some(20.0)]);

    for target in [
        "movingAverage(servers.web-01.cpu, 1e19)",
        "movingSum(servers.web-01.cpu, 10000000000000000000)",
        "movingMax(servers.web-01.cpu, 2.5)",
        "movingAverage(servers.web-01.cpu, '100000y')",
    ] {
        let err = eval(target).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvalError, "{target}: {err}");
    }
}

#[test]
fn nested_time_shifts_out_of_range_are_eval_errors() {
    let target = "timeShift(timeShift(a.b, '200000000000y'), '200000000000y')";
    let err = eval(target).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EvalError);

    let expr = parse(target).unwrap();
    assert!(matches!(
        fetch_windows(&expr, 0, 180),
        Err(ExprError::Eval { .. })
    ));
}

#[test]
fn top_n_filters_by_current_value() {
    let out = eval("highestCurrent(servers.*.cpu, 2)").unwrap();
    let names: Vec<_> = out.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["servers.db-01.cpu", "servers.web-01.cpu"]);
    let out = eval("currentAbove(servers.*.cpu, 20)").unwrap();
    assert_eq!(out.len(), 2);
}

#[test]
fn unknown_function_reports_position() {
    let err = eval("scale(nosuchFunc(a.b), 2)").unwrap_err();
    assert_eq!(
        err,
        ExprError::UnknownFunction {
            name: "nosuchFunc".into(),
            position: 6
        }
    );
    assert_eq!(err.kind(), ErrorKind::UnknownFunctionError);
}

#[test]
fn argument_errors_are_eval_errors() {
    for target in [
        "scale(servers.web-01.cpu)",
        "scale(servers.web-01.cpu, 'x')",
        "scale(servers.web-01.cpu, 1, 2)",
        "scale(servers.web-01.cpu, nope=2)",
        "movingAverage(servers.web-01.cpu, 'soon')",
        "summarize(servers.web-01.cpu, '1min', 'median')",
    ] {
        let err = eval(target).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvalError, "target {target}");
    }
}

#[test]
fn summarize_buckets_by_interval() {
    let out = eval("summarize(servers.web-01.cpu, '2min', 'max')").unwrap();
    assert_eq!(out[0].step, 120);
    assert_eq!(out[0].values, vec![Some(20.0), Some(30.0)]);
}

#[test]
fn time_shift_fetches_shifted_window() {
    let expr = parse("sumSeries(a.b, timeShift(a.b, '1h'))").unwrap();
    let windows = fetch_windows(&expr, 7200, 10800).unwrap();
    assert_eq!(
        windows,
        vec![
            FetchWindow {
                pattern: "a.b".into(),
                from: 7200,
                until: 10800
            },
            FetchWindow {
                pattern: "a.b".into(),
                from: 3600,
                until: 7200
            },
        ]
    );

    let mut resolver = PrefetchedResolver::new();
    resolver.insert(&windows[0], vec![TimeSeries::new("a.b", 7200, 3600, vec![Some(2.0)])]);
    resolver.insert(&windows[1], vec![TimeSeries::new("a.b", 3600, 3600, vec![Some(1.0)])]);
    let out = Evaluator::new(&resolver, 7200, 10800).eval(&expr).unwrap();
    assert_eq!(out[0].start, 7200);
    assert_eq!(out[0].values, vec![Some(3.0)]);
}

#[test]
fn synthetic_resolver_evaluates_any_known_function() {
    let resolver = SyntheticResolver::new(1_000);
    for target in [
        "a.b",
        "sumSeries(a.*, b.*)",
        "movingAverage(scale(a.b, 10), '5min')",
        "asPercent(a.b, 50)",
        "constantLine(3)",
    ] {
        let expr = parse(target).unwrap();
        let out = Evaluator::new(&resolver, 400, 1_000).eval(&expr).unwrap();
        assert!(!out.is_empty(), "target {target}");
    }
}

#[test]
fn registry_flags_unstable_functions() {
    assert!(functions::is_unstable("highestCurrent"));
    assert!(functions::is_unstable("removeBelowValue"));
    assert!(!functions::is_unstable("sumSeries"));
    assert!(!functions::is_known("sumseries"));
    assert!(functions::all().iter().any(|f| f.name == "timeShift"));
}

#[test]
fn interval_parsing() {
    assert_eq!(parse_interval("30s"), Some(30));
    assert_eq!(parse_interval("1mon"), Some(2_592_000));
    assert_eq!(parse_interval("2weeks"), Some(1_209_600));
    assert_eq!(parse_interval("min"), None);
    assert_eq!(parse_interval("3parsecs"), None);
}
