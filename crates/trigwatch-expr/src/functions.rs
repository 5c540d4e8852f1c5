//! Function registry and implementations.

use std::collections::BTreeMap;

use crate::ast::format_number;
use crate::error::{ExprError, Result};
use crate::eval::Value;
use crate::series::TimeSeries;

/// Accepted argument type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Series,
    Number,
    Int,
    Str,
    Bool,
    /// Interval string such as `'5min'` or `'-1d'`.
    Interval,
    /// Point count or interval string.
    NumberOrInterval,
}

impl ParamKind {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Series => "a series list",
            Self::Number => "a number",
            Self::Int => "an integer",
            Self::Str => "a string",
            Self::Bool => "a boolean",
            Self::Interval => "an interval string",
            Self::NumberOrInterval => "a number or an interval string",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    /// Soaks up every remaining positional argument.
    pub variadic: bool,
}

impl Param {
    const fn req(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            variadic: false,
        }
    }

    const fn opt(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            variadic: false,
        }
    }

    const fn many(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            variadic: true,
        }
    }
}

const SERIES: Param = Param::req("seriesList", ParamKind::Series);
const SERIES_MANY: Param = Param::many("seriesLists", ParamKind::Series);

/// A known function: its signature and implementation.
pub struct FunctionSpec {
    pub name: &'static str,
    pub params: &'static [Param],
    /// Result shape depends on live data (filters, top-N selectors), so a
    /// trigger built on it may flap.
    pub unstable: bool,
    pub(crate) apply: fn(&Args) -> Result<Vec<TimeSeries>>,
}

impl std::fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("unstable", &self.unstable)
            .finish()
    }
}

/// Evaluated arguments handed to a function implementation, one slot per
/// declared parameter.
pub struct Args {
    pub function: &'static str,
    /// Label of the call, used to name aggregated output.
    pub label: String,
    pub from: i64,
    pub until: i64,
    pub(crate) values: Vec<Vec<Value>>,
}

impl Args {
    fn slot(&self, idx: usize) -> &[Value] {
        self.values.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn series(&self, idx: usize) -> Vec<TimeSeries> {
        self.slot(idx)
            .iter()
            .filter_map(|v| match v {
                Value::Series(s) => Some(s.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn number(&self, idx: usize) -> Option<f64> {
        self.slot(idx).iter().find_map(|v| match v {
            Value::Number(n) => Some(*n),
            _ => None,
        })
    }

    pub fn int(&self, idx: usize) -> Option<i64> {
        self.number(idx).map(|n| n as i64)
    }

    pub fn ints(&self, idx: usize) -> Vec<i64> {
        self.slot(idx)
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => Some(*n as i64),
                _ => None,
            })
            .collect()
    }

    pub fn string(&self, idx: usize) -> Option<&str> {
        self.slot(idx).iter().find_map(|v| match v {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn boolean(&self, idx: usize) -> Option<bool> {
        self.slot(idx).iter().find_map(|v| match v {
            Value::Bool(b) => Some(*b),
            _ => None,
        })
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::eval(self.function, message)
    }
}

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}

pub fn is_unstable(name: &str) -> bool {
    lookup(name).is_some_and(|f| f.unstable)
}

pub fn all() -> &'static [FunctionSpec] {
    FUNCTIONS
}

/// Parse an interval string into signed seconds.
///
/// # Examples
///
/// ```
/// use trigwatch_expr::functions::parse_interval;
///
/// assert_eq!(parse_interval("5min"), Some(300));
/// assert_eq!(parse_interval("-1d"), Some(-86_400));
/// assert_eq!(parse_interval("+2h"), Some(7_200));
/// assert_eq!(parse_interval("five minutes"), None);
/// ```
pub fn parse_interval(interval: &str) -> Option<i64> {
    let s = interval.trim();
    let (sign, rest) = match s.as_bytes().first()? {
        b'-' => (-1, &s[1..]),
        b'+' => (1, &s[1..]),
        _ => (1, s),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let count: i64 = rest[..digits].parse().ok()?;
    let unit = match rest[digits..].trim().to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        "mon" | "month" | "months" => 2_592_000,
        "y" | "year" | "years" => 31_536_000,
        _ => return None,
    };
    count.checked_mul(unit).map(|secs| secs * sign)
}

static FUNCTIONS: &[FunctionSpec] = &[
    // combine
    FunctionSpec { name: "sumSeries", params: &[SERIES_MANY], unstable: false, apply: sum_series },
    FunctionSpec { name: "sum", params: &[SERIES_MANY], unstable: false, apply: sum_series },
    FunctionSpec { name: "averageSeries", params: &[SERIES_MANY], unstable: false, apply: average_series },
    FunctionSpec { name: "avg", params: &[SERIES_MANY], unstable: false, apply: average_series },
    FunctionSpec { name: "maxSeries", params: &[SERIES_MANY], unstable: false, apply: max_series },
    FunctionSpec { name: "minSeries", params: &[SERIES_MANY], unstable: false, apply: min_series },
    FunctionSpec { name: "multiplySeries", params: &[SERIES_MANY], unstable: false, apply: multiply_series },
    FunctionSpec { name: "diffSeries", params: &[SERIES_MANY], unstable: false, apply: diff_series },
    FunctionSpec { name: "rangeSeries", params: &[SERIES_MANY], unstable: false, apply: range_series },
    FunctionSpec { name: "countSeries", params: &[SERIES_MANY], unstable: false, apply: count_series },
    FunctionSpec { name: "group", params: &[SERIES_MANY], unstable: false, apply: |a| Ok(a.series(0)) },
    FunctionSpec {
        name: "divideSeries",
        params: &[
            Param::req("dividendSeriesList", ParamKind::Series),
            Param::req("divisorSeries", ParamKind::Series),
        ],
        unstable: false,
        apply: divide_series,
    },
    FunctionSpec {
        name: "asPercent",
        params: &[SERIES, Param::opt("total", ParamKind::Number)],
        unstable: false,
        apply: as_percent,
    },
    FunctionSpec {
        name: "groupByNode",
        params: &[
            SERIES,
            Param::req("nodeNum", ParamKind::Int),
            Param::opt("callback", ParamKind::Str),
        ],
        unstable: false,
        apply: group_by_node,
    },
    // transform
    FunctionSpec {
        name: "scale",
        params: &[SERIES, Param::req("factor", ParamKind::Number)],
        unstable: false,
        apply: |a| {
            let factor = a.number(1).unwrap_or(1.0);
            Ok(per_series(a, &format_number(factor), |v| Some(v * factor)))
        },
    },
    FunctionSpec {
        name: "offset",
        params: &[SERIES, Param::req("factor", ParamKind::Number)],
        unstable: false,
        apply: |a| {
            let amount = a.number(1).unwrap_or(0.0);
            Ok(per_series(a, &format_number(amount), |v| Some(v + amount)))
        },
    },
    FunctionSpec {
        name: "absolute",
        params: &[SERIES],
        unstable: false,
        apply: |a| Ok(per_series(a, "", |v| Some(v.abs()))),
    },
    FunctionSpec {
        name: "invert",
        params: &[SERIES],
        unstable: false,
        apply: |a| Ok(per_series(a, "", |v| (v != 0.0).then(|| 1.0 / v))),
    },
    FunctionSpec {
        name: "squareRoot",
        params: &[SERIES],
        unstable: false,
        apply: |a| Ok(per_series(a, "", |v| (v >= 0.0).then(|| v.sqrt()))),
    },
    FunctionSpec {
        name: "pow",
        params: &[SERIES, Param::req("factor", ParamKind::Number)],
        unstable: false,
        apply: |a| {
            let factor = a.number(1).unwrap_or(1.0);
            Ok(per_series(a, &format_number(factor), |v| {
                Some(v.powf(factor)).filter(|r| r.is_finite())
            }))
        },
    },
    FunctionSpec {
        name: "logarithm",
        params: &[SERIES, Param::opt("base", ParamKind::Number)],
        unstable: false,
        apply: |a| {
            let base = a.number(1).unwrap_or(10.0);
            if base <= 0.0 || base == 1.0 {
                return Err(a.error(format!("invalid base {}", format_number(base))));
            }
            Ok(per_series(a, &format_number(base), |v| {
                (v > 0.0).then(|| v.log(base))
            }))
        },
    },
    FunctionSpec {
        name: "isNonNull",
        params: &[SERIES],
        unstable: false,
        apply: is_non_null,
    },
    FunctionSpec {
        name: "transformNull",
        params: &[SERIES, Param::opt("default", ParamKind::Number)],
        unstable: false,
        apply: transform_null,
    },
    FunctionSpec {
        name: "keepLastValue",
        params: &[SERIES, Param::opt("limit", ParamKind::Int)],
        unstable: false,
        apply: keep_last_value,
    },
    FunctionSpec { name: "derivative", params: &[SERIES], unstable: false, apply: derivative },
    FunctionSpec {
        name: "nonNegativeDerivative",
        params: &[SERIES, Param::opt("maxValue", ParamKind::Number)],
        unstable: false,
        apply: |a| non_negative_derivative(a, false),
    },
    FunctionSpec {
        name: "perSecond",
        params: &[SERIES, Param::opt("maxValue", ParamKind::Number)],
        unstable: false,
        apply: |a| non_negative_derivative(a, true),
    },
    FunctionSpec { name: "integral", params: &[SERIES], unstable: false, apply: integral },
    FunctionSpec {
        name: "movingAverage",
        params: &[SERIES, Param::req("windowSize", ParamKind::NumberOrInterval)],
        unstable: false,
        apply: |a| moving(a, |w| Some(w.iter().sum::<f64>() / w.len() as f64)),
    },
    FunctionSpec {
        name: "movingSum",
        params: &[SERIES, Param::req("windowSize", ParamKind::NumberOrInterval)],
        unstable: false,
        apply: |a| moving(a, |w| Some(w.iter().sum())),
    },
    FunctionSpec {
        name: "movingMax",
        params: &[SERIES, Param::req("windowSize", ParamKind::NumberOrInterval)],
        unstable: false,
        apply: |a| moving(a, |w| w.iter().copied().reduce(f64::max)),
    },
    FunctionSpec {
        name: "movingMin",
        params: &[SERIES, Param::req("windowSize", ParamKind::NumberOrInterval)],
        unstable: false,
        apply: |a| moving(a, |w| w.iter().copied().reduce(f64::min)),
    },
    FunctionSpec {
        name: "summarize",
        params: &[
            SERIES,
            Param::req("intervalString", ParamKind::Interval),
            Param::opt("func", ParamKind::Str),
            Param::opt("alignToFrom", ParamKind::Bool),
        ],
        unstable: false,
        apply: summarize,
    },
    FunctionSpec {
        name: "consolidateBy",
        params: &[SERIES, Param::req("consolidationFunc", ParamKind::Str)],
        unstable: false,
        apply: consolidate_by,
    },
    FunctionSpec {
        name: "delay",
        params: &[SERIES, Param::req("steps", ParamKind::Int)],
        unstable: false,
        apply: delay,
    },
    FunctionSpec {
        name: "timeShift",
        params: &[
            SERIES,
            Param::req("timeShift", ParamKind::Interval),
            Param::opt("resetEnd", ParamKind::Bool),
        ],
        unstable: false,
        // The evaluator shifts the fetch window itself.
        apply: |a| Ok(a.series(0)),
    },
    FunctionSpec {
        name: "constantLine",
        params: &[Param::req("value", ParamKind::Number)],
        unstable: false,
        apply: constant_line,
    },
    // alias
    FunctionSpec {
        name: "alias",
        params: &[SERIES, Param::req("newName", ParamKind::Str)],
        unstable: false,
        apply: |a| {
            let name = a.string(1).unwrap_or_default().to_string();
            Ok(a.series(0).into_iter().map(|s| s.renamed(name.clone())).collect())
        },
    },
    FunctionSpec {
        name: "aliasByNode",
        params: &[SERIES, Param::many("nodes", ParamKind::Int)],
        unstable: false,
        apply: alias_by_node,
    },
    FunctionSpec {
        name: "aliasByMetric",
        params: &[SERIES],
        unstable: false,
        apply: |a| {
            Ok(a.series(0)
                .into_iter()
                .map(|s| {
                    let base = base_path(&s.name);
                    let last = base.rsplit('.').next().unwrap_or(base).to_string();
                    s.renamed(last)
                })
                .collect())
        },
    },
    // filter and sort
    FunctionSpec {
        name: "removeBelowValue",
        params: &[SERIES, Param::req("n", ParamKind::Number)],
        unstable: true,
        apply: |a| {
            let n = a.number(1).unwrap_or(0.0);
            Ok(per_series(a, &format_number(n), |v| (v >= n).then_some(v)))
        },
    },
    FunctionSpec {
        name: "removeAboveValue",
        params: &[SERIES, Param::req("n", ParamKind::Number)],
        unstable: true,
        apply: |a| {
            let n = a.number(1).unwrap_or(0.0);
            Ok(per_series(a, &format_number(n), |v| (v <= n).then_some(v)))
        },
    },
    FunctionSpec {
        name: "currentAbove",
        params: &[SERIES, Param::req("n", ParamKind::Number)],
        unstable: true,
        apply: |a| filter_by(a, TimeSeries::current, |v, n| v > n),
    },
    FunctionSpec {
        name: "currentBelow",
        params: &[SERIES, Param::req("n", ParamKind::Number)],
        unstable: true,
        apply: |a| filter_by(a, TimeSeries::current, |v, n| v <= n),
    },
    FunctionSpec {
        name: "maximumAbove",
        params: &[SERIES, Param::req("n", ParamKind::Number)],
        unstable: true,
        apply: |a| filter_by(a, TimeSeries::max, |v, n| v > n),
    },
    FunctionSpec {
        name: "minimumBelow",
        params: &[SERIES, Param::req("n", ParamKind::Number)],
        unstable: true,
        apply: |a| filter_by(a, TimeSeries::min, |v, n| v <= n),
    },
    FunctionSpec {
        name: "highestCurrent",
        params: &[SERIES, Param::opt("n", ParamKind::Int)],
        unstable: true,
        apply: |a| top_n(a, TimeSeries::current, true),
    },
    FunctionSpec {
        name: "highestMax",
        params: &[SERIES, Param::opt("n", ParamKind::Int)],
        unstable: true,
        apply: |a| top_n(a, TimeSeries::max, true),
    },
    FunctionSpec {
        name: "lowestCurrent",
        params: &[SERIES, Param::opt("n", ParamKind::Int)],
        unstable: true,
        apply: |a| top_n(a, TimeSeries::current, false),
    },
    FunctionSpec {
        name: "sortByMaxima",
        params: &[SERIES],
        unstable: true,
        apply: |a| {
            let mut series = a.series(0);
            sort_by_key(&mut series, TimeSeries::max, true);
            Ok(series)
        },
    },
    FunctionSpec {
        name: "limit",
        params: &[SERIES, Param::req("n", ParamKind::Int)],
        unstable: true,
        apply: |a| {
            let n = a.int(1).unwrap_or(0).max(0) as usize;
            Ok(a.series(0).into_iter().take(n).collect())
        },
    },
    FunctionSpec {
        name: "exclude",
        params: &[SERIES, Param::req("pattern", ParamKind::Str)],
        unstable: true,
        apply: |a| {
            let pattern = a.string(1).unwrap_or_default();
            Ok(a.series(0).into_iter().filter(|s| !s.name.contains(pattern)).collect())
        },
    },
    FunctionSpec {
        name: "grep",
        params: &[SERIES, Param::req("pattern", ParamKind::Str)],
        unstable: true,
        apply: |a| {
            let pattern = a.string(1).unwrap_or_default();
            Ok(a.series(0).into_iter().filter(|s| s.name.contains(pattern)).collect())
        },
    },
];

/// Innermost path of a possibly wrapped series name,
/// e.g. `scale(a.b.c,2)` -> `a.b.c`.
fn base_path(name: &str) -> &str {
    let inner = name.rsplit('(').next().unwrap_or(name);
    inner.split([',', ')']).next().unwrap_or(inner)
}

fn wrap_name(function: &str, name: &str, extra: &str) -> String {
    if extra.is_empty() {
        format!("{function}({name})")
    } else {
        format!("{function}({name},{extra})")
    }
}

fn per_series(args: &Args, extra: &str, f: impl Fn(f64) -> Option<f64>) -> Vec<TimeSeries> {
    args.series(0)
        .into_iter()
        .map(|s| {
            let name = wrap_name(args.function, &s.name, extra);
            s.map_values(&f).renamed(name)
        })
        .collect()
}

/// Combine point-aligned values of several series into one.
fn aggregate(
    label: &str,
    series: &[TimeSeries],
    f: impl Fn(&[Option<f64>]) -> Option<f64>,
) -> Vec<TimeSeries> {
    let Some(step) = series.iter().map(|s| s.step).max() else {
        return Vec::new();
    };
    let start = series.iter().map(|s| s.start).min().unwrap_or(0);
    let stop = series.iter().map(TimeSeries::stop).max().unwrap_or(start);
    let slots = ((stop - start + step - 1) / step).max(0) as usize;
    let mut row = Vec::with_capacity(series.len());
    let values = (0..slots)
        .map(|idx| {
            let ts = start + step * idx as i64;
            row.clear();
            row.extend(series.iter().map(|s| s.value_at(ts)));
            if row.iter().all(Option::is_none) {
                None
            } else {
                f(&row)
            }
        })
        .collect();
    vec![TimeSeries::new(label, start, step, values)]
}

fn present(row: &[Option<f64>]) -> impl Iterator<Item = f64> + '_ {
    row.iter().flatten().copied()
}

fn sum_series(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(aggregate(&a.label, &a.series(0), |row| Some(present(row).sum())))
}

fn average_series(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(aggregate(&a.label, &a.series(0), |row| {
        let count = present(row).count();
        (count > 0).then(|| present(row).sum::<f64>() / count as f64)
    }))
}

fn max_series(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(aggregate(&a.label, &a.series(0), |row| present(row).reduce(f64::max)))
}

fn min_series(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(aggregate(&a.label, &a.series(0), |row| present(row).reduce(f64::min)))
}

fn multiply_series(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(aggregate(&a.label, &a.series(0), |row| {
        row.iter().try_fold(1.0, |acc, v| v.map(|v| acc * v))
    }))
}

fn diff_series(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(aggregate(&a.label, &a.series(0), |row| {
        let mut values = present(row);
        let first = values.next()?;
        Some(first - values.sum::<f64>())
    }))
}

fn range_series(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(aggregate(&a.label, &a.series(0), |row| {
        let max = present(row).reduce(f64::max)?;
        let min = present(row).reduce(f64::min)?;
        Some(max - min)
    }))
}

fn count_series(a: &Args) -> Result<Vec<TimeSeries>> {
    let series = a.series(0);
    let count = series.len() as f64;
    if series.is_empty() {
        return constant(a, &a.label, 0.0);
    }
    Ok(aggregate(&a.label, &series, |_| Some(count)))
}

fn divide_series(a: &Args) -> Result<Vec<TimeSeries>> {
    let divisors = a.series(1);
    let [divisor] = divisors.as_slice() else {
        return Err(a.error(format!(
            "divisorSeries must be exactly one series, got {}",
            divisors.len()
        )));
    };
    Ok(a.series(0)
        .into_iter()
        .map(|s| {
            let name = format!("divideSeries({},{})", s.name, divisor.name);
            let values = (0..s.values.len())
                .map(|idx| {
                    let num = s.values[idx]?;
                    let den = divisor.value_at(s.timestamp_at(idx))?;
                    (den != 0.0).then(|| num / den)
                })
                .collect();
            TimeSeries::new(name, s.start, s.step, values)
        })
        .collect())
}

fn as_percent(a: &Args) -> Result<Vec<TimeSeries>> {
    let series = a.series(0);
    if let Some(total) = a.number(1) {
        let extra = format_number(total);
        return Ok(series
            .into_iter()
            .map(|s| {
                let name = wrap_name(a.function, &s.name, &extra);
                s.map_values(|v| (total != 0.0).then(|| v / total * 100.0))
                    .renamed(name)
            })
            .collect());
    }
    let totals = aggregate("total", &series, |row| Some(present(row).sum()));
    let Some(total) = totals.first() else {
        return Ok(Vec::new());
    };
    Ok(series
        .into_iter()
        .map(|s| {
            let name = wrap_name(a.function, &s.name, "");
            let values = (0..s.values.len())
                .map(|idx| {
                    let v = s.values[idx]?;
                    let t = total.value_at(s.timestamp_at(idx))?;
                    (t != 0.0).then(|| v / t * 100.0)
                })
                .collect();
            TimeSeries::new(name, s.start, s.step, values)
        })
        .collect())
}

fn node_of(name: &str, idx: i64) -> Option<&str> {
    let nodes: Vec<&str> = base_path(name).split('.').collect();
    let idx = if idx < 0 {
        nodes.len() as i64 + idx
    } else {
        idx
    };
    usize::try_from(idx).ok().and_then(|i| nodes.get(i).copied())
}

fn group_by_node(a: &Args) -> Result<Vec<TimeSeries>> {
    let node = a.int(1).unwrap_or(0);
    let callback = a.string(2).unwrap_or("average");
    let mut groups: BTreeMap<String, Vec<TimeSeries>> = BTreeMap::new();
    for s in a.series(0) {
        let key = node_of(&s.name, node).unwrap_or_default().to_string();
        groups.entry(key).or_default().push(s);
    }
    let combine: fn(&[Option<f64>]) -> Option<f64> = match callback {
        "sum" | "sumSeries" => |row| Some(present(row).sum()),
        "average" | "averageSeries" | "avg" => |row| {
            let count = present(row).count();
            (count > 0).then(|| present(row).sum::<f64>() / count as f64)
        },
        "max" | "maxSeries" => |row| present(row).reduce(f64::max),
        "min" | "minSeries" => |row| present(row).reduce(f64::min),
        "count" | "countSeries" => |row| Some(present(row).count() as f64),
        other => return Err(a.error(format!("unsupported callback '{other}'"))),
    };
    Ok(groups
        .into_iter()
        .flat_map(|(key, series)| aggregate(&key, &series, combine))
        .collect())
}

fn is_non_null(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(a.series(0)
        .into_iter()
        .map(|mut s| {
            s.name = wrap_name(a.function, &s.name, "");
            for v in s.values.iter_mut() {
                *v = Some(if v.is_some() { 1.0 } else { 0.0 });
            }
            s
        })
        .collect())
}

fn transform_null(a: &Args) -> Result<Vec<TimeSeries>> {
    let default = a.number(1).unwrap_or(0.0);
    let extra = format_number(default);
    Ok(a.series(0)
        .into_iter()
        .map(|mut s| {
            s.name = wrap_name(a.function, &s.name, &extra);
            for v in s.values.iter_mut() {
                v.get_or_insert(default);
            }
            s
        })
        .collect())
}

fn keep_last_value(a: &Args) -> Result<Vec<TimeSeries>> {
    let limit = a.int(1).map(|n| n.max(0) as usize);
    Ok(a.series(0)
        .into_iter()
        .map(|mut s| {
            s.name = wrap_name(a.function, &s.name, "");
            let mut last = None;
            let mut gap = 0usize;
            for v in s.values.iter_mut() {
                match v {
                    Some(x) => {
                        last = Some(*x);
                        gap = 0;
                    }
                    None => {
                        gap += 1;
                        if limit.map_or(true, |l| gap <= l) {
                            *v = last;
                        }
                    }
                }
            }
            s
        })
        .collect())
}

fn derivative(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(a.series(0)
        .into_iter()
        .map(|mut s| {
            s.name = wrap_name(a.function, &s.name, "");
            let mut prev = None;
            for v in s.values.iter_mut() {
                let cur = *v;
                *v = match (prev, cur) {
                    (Some(p), Some(c)) => Some(c - p),
                    _ => None,
                };
                prev = cur;
            }
            s
        })
        .collect())
}

fn non_negative_derivative(a: &Args, per_second: bool) -> Result<Vec<TimeSeries>> {
    let max_value = a.number(1);
    Ok(a.series(0)
        .into_iter()
        .map(|mut s| {
            s.name = wrap_name(a.function, &s.name, "");
            let step = s.step as f64;
            let mut prev: Option<f64> = None;
            for v in s.values.iter_mut() {
                let cur = *v;
                let delta = match (prev, cur) {
                    (Some(p), Some(c)) if c >= p => Some(c - p),
                    // counter wrapped
                    (Some(p), Some(c)) => max_value.filter(|m| c <= *m).map(|m| m - p + c + 1.0),
                    _ => None,
                };
                *v = if per_second { delta.map(|d| d / step) } else { delta };
                prev = cur;
            }
            s
        })
        .collect())
}

fn integral(a: &Args) -> Result<Vec<TimeSeries>> {
    Ok(a.series(0)
        .into_iter()
        .map(|mut s| {
            s.name = wrap_name(a.function, &s.name, "");
            let mut total = 0.0;
            for v in s.values.iter_mut() {
                if let Some(x) = v {
                    total += *x;
                    *v = Some(total);
                }
            }
            s
        })
        .collect())
}

/// Upper bound on a moving window, in points.
pub const MAX_WINDOW_POINTS: u32 = 1_000_000;

fn window_points(a: &Args, step: i64) -> Result<(usize, String)> {
    if let Some(n) = a.number(1) {
        if n < 1.0 {
            return Err(a.error("windowSize must be at least 1"));
        }
        if n.fract() != 0.0 {
            return Err(a.error(format!("windowSize must be a whole number of points, got {n}")));
        }
        if n > MAX_WINDOW_POINTS as f64 {
            return Err(a.error(format!(
                "windowSize {} exceeds {MAX_WINDOW_POINTS} points",
                format_number(n)
            )));
        }
        return Ok((n as usize, format_number(n)));
    }
    let text = a.string(1).unwrap_or_default();
    let secs = parse_interval(text)
        .map(i64::abs)
        .ok_or_else(|| a.error(format!("invalid windowSize '{text}'")))?;
    let points = (secs / step.max(1)).max(1);
    if points > MAX_WINDOW_POINTS as i64 {
        return Err(a.error(format!(
            "windowSize '{text}' spans more than {MAX_WINDOW_POINTS} points"
        )));
    }
    Ok((points as usize, format!("'{text}'")))
}

fn moving(a: &Args, f: fn(&[f64]) -> Option<f64>) -> Result<Vec<TimeSeries>> {
    let mut out = Vec::new();
    for mut s in a.series(0) {
        let (window, extra) = window_points(a, s.step)?;
        s.name = wrap_name(a.function, &s.name, &extra);
        let source = s.values.clone();
        let mut buf = Vec::with_capacity(window.min(s.values.len()));
        for (idx, v) in s.values.iter_mut().enumerate() {
            let lo = (idx + 1).saturating_sub(window);
            buf.clear();
            buf.extend(source[lo..=idx].iter().flatten().copied());
            *v = if buf.is_empty() { None } else { f(&buf) };
        }
        out.push(s);
    }
    Ok(out)
}

fn reducer(a: &Args, name: &str) -> Result<fn(&[f64]) -> Option<f64>> {
    let reduce: fn(&[f64]) -> Option<f64> = match name {
        "sum" | "total" => |w| Some(w.iter().sum()),
        "avg" | "average" => |w| Some(w.iter().sum::<f64>() / w.len() as f64),
        "max" => |w| w.iter().copied().reduce(f64::max),
        "min" => |w| w.iter().copied().reduce(f64::min),
        "last" => |w| w.last().copied(),
        "first" => |w| w.first().copied(),
        "count" => |w| Some(w.len() as f64),
        other => return Err(a.error(format!("unsupported function '{other}'"))),
    };
    Ok(reduce)
}

fn summarize(a: &Args) -> Result<Vec<TimeSeries>> {
    let interval_text = a.string(1).unwrap_or_default();
    let interval = parse_interval(interval_text)
        .map(i64::abs)
        .filter(|s| *s > 0)
        .ok_or_else(|| a.error(format!("invalid interval '{interval_text}'")))?;
    let func_name = a.string(2).unwrap_or("sum");
    let reduce = reducer(a, func_name)?;
    let align_to_from = a.boolean(3).unwrap_or(false);
    Ok(a.series(0)
        .into_iter()
        .map(|s| {
            let anchor = if align_to_from { a.from } else { 0 };
            let first = s.start - s.start.saturating_sub(anchor).rem_euclid(interval);
            let span = s.stop().saturating_sub(first);
            let buckets = (span / interval + i64::from(span % interval != 0)).max(0) as usize;
            let mut grouped: Vec<Vec<f64>> = vec![Vec::new(); buckets];
            for (idx, v) in s.values.iter().enumerate() {
                if let Some(v) = v {
                    let bucket = ((s.timestamp_at(idx) - first) / interval) as usize;
                    if let Some(slot) = grouped.get_mut(bucket) {
                        slot.push(*v);
                    }
                }
            }
            let values = grouped
                .iter()
                .map(|w| if w.is_empty() { None } else { reduce(w) })
                .collect();
            let name = format!(
                "{}({},\"{interval_text}\",\"{func_name}\")",
                a.function, s.name
            );
            TimeSeries::new(name, first, interval, values)
        })
        .collect())
}

fn consolidate_by(a: &Args) -> Result<Vec<TimeSeries>> {
    let func = a.string(1).unwrap_or_default();
    if !matches!(func, "sum" | "average" | "avg" | "min" | "max" | "first" | "last") {
        return Err(a.error(format!("unsupported consolidation function '{func}'")));
    }
    let extra = format!("'{func}'");
    Ok(a.series(0)
        .into_iter()
        .map(|s| {
            let name = wrap_name(a.function, &s.name, &extra);
            s.renamed(name)
        })
        .collect())
}

fn delay(a: &Args) -> Result<Vec<TimeSeries>> {
    let steps = a.int(1).unwrap_or(0);
    Ok(a.series(0)
        .into_iter()
        .map(|mut s| {
            s.name = wrap_name(a.function, &s.name, &steps.to_string());
            let len = s.values.len();
            let shift = steps.unsigned_abs() as usize;
            let shifted: Vec<Option<f64>> = (0..len)
                .map(|idx| {
                    if steps >= 0 {
                        idx.checked_sub(shift).and_then(|src| s.values[src])
                    } else {
                        s.values.get(idx + shift).copied().flatten()
                    }
                })
                .collect();
            s.values = shifted;
            s
        })
        .collect())
}

fn constant(a: &Args, name: &str, value: f64) -> Result<Vec<TimeSeries>> {
    let step = ((a.until - a.from) / 2).max(1);
    Ok(vec![TimeSeries::new(name, a.from, step, vec![Some(value); 3])])
}

fn constant_line(a: &Args) -> Result<Vec<TimeSeries>> {
    let value = a.number(0).unwrap_or(0.0);
    constant(a, &format_number(value), value)
}

fn alias_by_node(a: &Args) -> Result<Vec<TimeSeries>> {
    let nodes = a.ints(1);
    Ok(a.series(0)
        .into_iter()
        .map(|s| {
            let name = nodes
                .iter()
                .filter_map(|n| node_of(&s.name, *n))
                .collect::<Vec<_>>()
                .join(".");
            s.renamed(name)
        })
        .collect())
}

fn filter_by(
    a: &Args,
    key: fn(&TimeSeries) -> Option<f64>,
    keep: fn(f64, f64) -> bool,
) -> Result<Vec<TimeSeries>> {
    let n = a.number(1).unwrap_or(0.0);
    Ok(a.series(0)
        .into_iter()
        .filter(|s| key(s).is_some_and(|v| keep(v, n)))
        .collect())
}

fn sort_by_key(series: &mut [TimeSeries], key: fn(&TimeSeries) -> Option<f64>, descending: bool) {
    series.sort_by(|x, y| {
        let (kx, ky) = (key(x).unwrap_or(f64::NEG_INFINITY), key(y).unwrap_or(f64::NEG_INFINITY));
        let ord = kx.total_cmp(&ky);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
}

fn top_n(a: &Args, key: fn(&TimeSeries) -> Option<f64>, descending: bool) -> Result<Vec<TimeSeries>> {
    let n = a.int(1).unwrap_or(1).max(0) as usize;
    let mut series: Vec<TimeSeries> = a.series(0).into_iter().filter(|s| key(s).is_some()).collect();
    sort_by_key(&mut series, key, descending);
    series.truncate(n);
    Ok(series)
}
