use std::time::Duration;

use trigwatch_common::context::OpContext;
use trigwatch_common::error::ErrorKind;
use trigwatch_common::problem::{ProblemKind, ProblemNode, TargetVerification};
use trigwatch_expr::{functions, parse, Evaluator, Expr, ExprError, SyntheticResolver, TimeSeries};
use trigwatch_source::{MetricSource, SourceError, SourceKind, SourceProvider};

use crate::error::VerifyError;

/// Verify every target on the source selected by `is_remote`, returning one
/// problem tree per target in input order.
///
/// # Errors
///
/// [`VerifyError::SourceNotConfigured`] when `is_remote` is set and the
/// provider has no remote source. Per-target failures never abort the call.
pub async fn verify_targets(
    provider: &SourceProvider,
    ctx: &OpContext,
    targets: &[String],
    ttl: Duration,
    is_remote: bool,
    now: i64,
) -> Result<Vec<TargetVerification>, VerifyError> {
    let source = provider.get(is_remote).map_err(|e| {
        tracing::warn!(error = %e, "Verification without a matching source");
        VerifyError::SourceNotConfigured
    })?;
    let mut out = Vec::with_capacity(targets.len());
    for target in targets {
        out.push(verify_target(source.as_ref(), ctx, target, ttl, now).await);
    }
    Ok(out)
}

/// Build the problem tree of one target.
///
/// Parse failures and remote failures replace the root; unknown functions,
/// evaluation errors and warnings are attached below it.
pub async fn verify_target(
    source: &dyn MetricSource,
    ctx: &OpContext,
    target: &str,
    ttl: Duration,
    now: i64,
) -> TargetVerification {
    let expr = match parse(target) {
        Ok(expr) => expr,
        Err(e) => {
            return TargetVerification {
                target: target.to_string(),
                syntax_ok: false,
                tree: ProblemNode::new(ProblemKind::ParseError, target, e.message, e.position),
            }
        }
    };
    let is_remote = source.kind() == SourceKind::Remote;
    let from = now - ttl.as_secs() as i64;
    let (root_unknown, mut problems) = function_problems(&expr, is_remote);

    let tree = if let Some(root) = root_unknown {
        root.with_problems(problems)
    } else if problems.iter().any(|p| p.kind.is_error()) {
        ProblemNode::ok(target).with_problems(problems)
    } else if is_remote {
        match source.fetch(ctx, from, now, target).await {
            Ok(fetched) => {
                if fetched.series.is_empty() {
                    problems.push(no_data(target, 0, ttl));
                }
                for series in fetched.series.iter().filter(|s| !has_data(s)) {
                    problems.push(no_data(&series.name, 0, ttl));
                }
                ProblemNode::ok(target).with_problems(problems)
            }
            Err(e) => {
                tracing::warn!(query = target, error = %e, "Remote verification failed");
                source_failure(target, &e).with_problems(problems)
            }
        }
    } else {
        let resolver = SyntheticResolver::new(now);
        match Evaluator::new(&resolver, from, now).eval(&expr) {
            Ok(_) => {
                problems.extend(local_staleness(source, ctx, &expr, from, now, ttl).await);
            }
            Err(e) => problems.push(eval_problem(&expr, &e)),
        }
        ProblemNode::ok(target).with_problems(problems)
    };

    TargetVerification {
        target: target.to_string(),
        syntax_ok: true,
        tree,
    }
}

/// Unknown and unstable function nodes. The first element is set when the
/// outermost call itself is unknown. A remote API owns its own function set,
/// so unknown names are only reported for local targets.
fn function_problems(expr: &Expr, is_remote: bool) -> (Option<ProblemNode>, Vec<ProblemNode>) {
    let mut root = None;
    let mut problems = Vec::new();
    for call in expr.functions() {
        if !functions::is_known(&call.name) {
            if is_remote {
                continue;
            }
            let node = ProblemNode::new(
                ProblemKind::UnknownFunctionError,
                &call.name,
                format!("function '{}' is not supported", call.name),
                call.position,
            );
            if call.depth == 0 {
                root = Some(node);
            } else {
                problems.push(node);
            }
        } else if functions::is_unstable(&call.name) {
            problems.push(ProblemNode::new(
                ProblemKind::UnstableFunction,
                &call.name,
                "result depends on current values and may cause false notifications",
                call.position,
            ));
        }
    }
    (root, problems)
}

fn eval_problem(expr: &Expr, err: &ExprError) -> ProblemNode {
    match err {
        ExprError::Eval { function, message } => {
            let position = expr
                .functions()
                .into_iter()
                .find(|c| &c.name == function)
                .map_or(0, |c| c.position);
            ProblemNode::new(ProblemKind::EvalError, function, message, position)
        }
        ExprError::UnknownFunction { name, position } => ProblemNode::new(
            ProblemKind::UnknownFunctionError,
            name,
            err.to_string(),
            *position,
        ),
        ExprError::Parse(e) => {
            ProblemNode::new(ProblemKind::ParseError, expr.label(), &e.message, e.position)
        }
    }
}

fn source_failure(target: &str, err: &SourceError) -> ProblemNode {
    let kind = match err.kind() {
        ErrorKind::RemoteUnavailable => ProblemKind::RemoteUnavailable,
        ErrorKind::RemoteBadResponse => ProblemKind::RemoteBadResponse,
        ErrorKind::ParseError => ProblemKind::ParseError,
        ErrorKind::EvalError => ProblemKind::EvalError,
        ErrorKind::UnknownFunctionError => ProblemKind::UnknownFunctionError,
        _ => ProblemKind::InternalError,
    };
    ProblemNode::new(kind, target, err.to_string(), 0)
}

/// One `NoData` node per series pattern with no point inside the window.
/// Store failures here are logged and skipped: staleness never fails a
/// tree.
async fn local_staleness(
    source: &dyn MetricSource,
    ctx: &OpContext,
    expr: &Expr,
    from: i64,
    now: i64,
    ttl: Duration,
) -> Vec<ProblemNode> {
    let mut problems = Vec::new();
    for (pattern, position) in expr.path_sites() {
        match source.fetch(ctx, from, now, &pattern).await {
            Ok(fetched) if fetched.series.iter().any(has_data) => {}
            Ok(_) => problems.push(no_data(&pattern, position, ttl)),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Staleness check skipped");
            }
        }
    }
    problems
}

fn has_data(series: &TimeSeries) -> bool {
    series.values.iter().any(Option::is_some)
}

fn no_data(argument: &str, position: usize, ttl: Duration) -> ProblemNode {
    ProblemNode::new(
        ProblemKind::NoData,
        argument,
        format!("no data points within the last {}s", ttl.as_secs()),
        position,
    )
}
