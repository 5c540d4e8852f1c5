use crate::ast::{Arg, Expr};
use crate::error::{ExprError, Result};
use crate::functions::{self, parse_interval, Args, FunctionSpec, ParamKind};
use crate::series::TimeSeries;

/// Supplies raw series for a path pattern over a time range.
pub trait SeriesResolver {
    fn resolve(&self, pattern: &str, from: i64, until: i64) -> Vec<TimeSeries>;
}

/// A series pattern together with the window it must be fetched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub pattern: String,
    pub from: i64,
    pub until: i64,
}

/// Evaluated function argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Series(Vec<TimeSeries>),
    Number(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Series(_) => "series list",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
        }
    }
}

/// Evaluates expressions over `[from, until]` using a resolver for paths.
pub struct Evaluator<'r, R: SeriesResolver + ?Sized> {
    resolver: &'r R,
    from: i64,
    until: i64,
}

impl<'r, R: SeriesResolver + ?Sized> Evaluator<'r, R> {
    pub fn new(resolver: &'r R, from: i64, until: i64) -> Self {
        Self {
            resolver,
            from,
            until,
        }
    }

    /// Evaluate a top-level target; the result must be a series list.
    pub fn eval(&self, expr: &Expr) -> Result<Vec<TimeSeries>> {
        match self.eval_value(expr)? {
            Value::Series(series) => Ok(series),
            other => Err(ExprError::eval(
                &expr.label(),
                format!("target evaluates to a {}, not a series list", other.type_name()),
            )),
        }
    }

    fn eval_value(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Path { pattern, .. } => Ok(Value::Series(self.resolver.resolve(
                pattern,
                self.from,
                self.until,
            ))),
            Expr::Number { value, .. } => Ok(Value::Number(*value)),
            Expr::Str { value, .. } => Ok(Value::Str(value.clone())),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            Expr::Call {
                name,
                args,
                position,
            } => {
                let spec = functions::lookup(name).ok_or_else(|| ExprError::UnknownFunction {
                    name: name.clone(),
                    position: *position,
                })?;
                let slots = bind(spec, args)?;
                if spec.name == "timeShift" {
                    return self.eval_time_shift(spec, expr, &slots);
                }
                let mut values = Vec::with_capacity(slots.len());
                for (param, slot) in spec.params.iter().zip(&slots) {
                    let mut evaluated = Vec::with_capacity(slot.len());
                    for arg in slot {
                        let value = self.eval_value(arg)?;
                        check_kind(spec, param.name, param.kind, &value)?;
                        evaluated.push(value);
                    }
                    values.push(evaluated);
                }
                let args = Args {
                    function: spec.name,
                    label: expr.label(),
                    from: self.from,
                    until: self.until,
                    values,
                };
                Ok(Value::Series((spec.apply)(&args)?))
            }
        }
    }

    fn eval_time_shift(
        &self,
        spec: &FunctionSpec,
        call: &Expr,
        slots: &[Vec<&Expr>],
    ) -> Result<Value> {
        let shift_expr = slots
            .get(1)
            .and_then(|s| s.first())
            .ok_or_else(|| ExprError::eval(spec.name, "missing timeShift argument"))?;
        let shift_value = self.eval_value(shift_expr)?;
        check_kind(spec, "timeShift", ParamKind::Interval, &shift_value)?;
        let offset = match &shift_value {
            Value::Str(s) => shift_offset(s)
                .ok_or_else(|| ExprError::eval(spec.name, format!("invalid interval '{s}'")))?,
            _ => 0,
        };
        let (from, until) = shifted_window(self.from, self.until, offset)
            .ok_or_else(|| ExprError::eval(spec.name, "shifted window is out of range"))?;
        let inner = Evaluator::new(self.resolver, from, until);
        let source = slots
            .first()
            .and_then(|s| s.first())
            .ok_or_else(|| ExprError::eval(spec.name, "missing series argument"))?;
        let value = inner.eval_value(source)?;
        check_kind(spec, "seriesList", ParamKind::Series, &value)?;
        let Value::Series(series) = value else {
            return Ok(value);
        };
        let label = call.label();
        Ok(Value::Series(
            series
                .into_iter()
                .map(|mut s| {
                    s.start = s.start.saturating_sub(offset);
                    s.name = label.clone();
                    s
                })
                .collect(),
        ))
    }
}

/// Graphite semantics: an unsigned interval shifts into the past.
fn shift_offset(interval: &str) -> Option<i64> {
    let secs = parse_interval(interval)?;
    if interval.trim_start().starts_with('+') {
        Some(secs.abs())
    } else {
        Some(-secs.abs())
    }
}

fn shifted_window(from: i64, until: i64, offset: i64) -> Option<(i64, i64)> {
    Some((from.checked_add(offset)?, until.checked_add(offset)?))
}

/// Assign call arguments to parameter slots without evaluating them.
fn bind<'a>(spec: &FunctionSpec, args: &'a [Arg]) -> Result<Vec<Vec<&'a Expr>>> {
    let mut slots: Vec<Vec<&Expr>> = vec![Vec::new(); spec.params.len()];
    let mut next = 0usize;
    for arg in args {
        match &arg.name {
            None => {
                let Some(param) = spec.params.get(next) else {
                    return Err(ExprError::eval(
                        spec.name,
                        format!("too many arguments (expected at most {})", spec.params.len()),
                    ));
                };
                slots[next].push(&arg.value);
                if !param.variadic {
                    next += 1;
                }
            }
            Some(name) => {
                let idx = spec
                    .params
                    .iter()
                    .position(|p| p.name == name)
                    .ok_or_else(|| {
                        ExprError::eval(spec.name, format!("unexpected keyword argument '{name}'"))
                    })?;
                if !slots[idx].is_empty() {
                    return Err(ExprError::eval(
                        spec.name,
                        format!("argument '{name}' given more than once"),
                    ));
                }
                slots[idx].push(&arg.value);
            }
        }
    }
    for (param, slot) in spec.params.iter().zip(&slots) {
        if param.required && slot.is_empty() {
            return Err(ExprError::eval(
                spec.name,
                format!("missing required argument '{}'", param.name),
            ));
        }
    }
    Ok(slots)
}

fn check_kind(spec: &FunctionSpec, param: &str, kind: ParamKind, value: &Value) -> Result<()> {
    let ok = match (kind, value) {
        (ParamKind::Series, Value::Series(_)) => true,
        (ParamKind::Number, Value::Number(_)) => true,
        (ParamKind::Int, Value::Number(n)) => n.fract() == 0.0,
        (ParamKind::Str, Value::Str(_)) => true,
        (ParamKind::Bool, Value::Bool(_)) => true,
        (ParamKind::NumberOrInterval, Value::Number(_)) => true,
        (ParamKind::NumberOrInterval | ParamKind::Interval, Value::Str(s)) => {
            parse_interval(s).is_some()
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ExprError::eval(
            spec.name,
            format!(
                "argument '{param}' must be {}, got {}",
                kind.describe(),
                value.type_name()
            ),
        ))
    }
}

/// Patterns an expression reads together with the (possibly time-shifted)
/// windows they are read for. Used to prefetch data before evaluation.
///
/// # Errors
///
/// [`ExprError::Eval`] when nested `timeShift` offsets move a window out of
/// the representable time range.
pub fn fetch_windows(expr: &Expr, from: i64, until: i64) -> Result<Vec<FetchWindow>> {
    let mut out = Vec::new();
    collect_windows(expr, from, until, &mut out)?;
    Ok(out)
}

fn collect_windows(expr: &Expr, from: i64, until: i64, out: &mut Vec<FetchWindow>) -> Result<()> {
    match expr {
        Expr::Path { pattern, .. } => {
            let window = FetchWindow {
                pattern: pattern.clone(),
                from,
                until,
            };
            if !out.contains(&window) {
                out.push(window);
            }
        }
        Expr::Call { name, args, .. } => {
            let offset = if name == "timeShift" {
                args.iter()
                    .filter(|a| a.name.as_deref().map_or(true, |n| n == "timeShift"))
                    .find_map(|a| match &a.value {
                        Expr::Str { value, .. } => shift_offset(value),
                        _ => None,
                    })
                    .unwrap_or(0)
            } else {
                0
            };
            let (from, until) = shifted_window(from, until, offset)
                .ok_or_else(|| ExprError::eval(name, "shifted window is out of range"))?;
            for arg in args {
                collect_windows(&arg.value, from, until, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}
