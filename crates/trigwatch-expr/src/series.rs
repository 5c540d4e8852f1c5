use trigwatch_common::types::MetricValue;

/// A fixed-step series over `[start, start + step * values.len())`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    /// Unix seconds of the first slot.
    pub start: i64,
    /// Seconds between slots, always > 0.
    pub step: i64,
    pub values: Vec<Option<f64>>,
}

impl TimeSeries {
    pub fn new(name: impl Into<String>, start: i64, step: i64, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            start,
            step: step.max(1),
            values,
        }
    }

    /// Lay raw points onto a grid covering `[from, until]`. A later point in
    /// the same slot overwrites an earlier one.
    ///
    /// # Examples
    ///
    /// ```
    /// use trigwatch_common::types::MetricValue;
    /// use trigwatch_expr::TimeSeries;
    ///
    /// let points = [
    ///     MetricValue { timestamp: 60, value: 1.0 },
    ///     MetricValue { timestamp: 185, value: 3.0 },
    /// ];
    /// let ts = TimeSeries::from_points("a.b", 60, 240, 60, &points);
    /// assert_eq!(ts.values, vec![Some(1.0), None, Some(3.0), None]);
    /// assert_eq!(ts.last_timestamp_with_data(), Some(180));
    /// ```
    pub fn from_points(
        name: impl Into<String>,
        from: i64,
        until: i64,
        step: i64,
        points: &[MetricValue],
    ) -> Self {
        let step = step.max(1);
        let start = from - from.rem_euclid(step);
        let slots = ((until - start) / step + 1).max(0) as usize;
        let mut values = vec![None; slots];
        for point in points {
            if point.timestamp < start || point.timestamp >= start + step * slots as i64 {
                continue;
            }
            let idx = ((point.timestamp - start) / step) as usize;
            values[idx] = Some(point.value);
        }
        Self::new(name, start, step, values)
    }

    pub fn stop(&self) -> i64 {
        self.start + self.step * self.values.len() as i64
    }

    pub fn timestamp_at(&self, idx: usize) -> i64 {
        self.start + self.step * idx as i64
    }

    /// Value of the slot containing `ts`.
    pub fn value_at(&self, ts: i64) -> Option<f64> {
        if ts < self.start {
            return None;
        }
        let idx = ((ts - self.start) / self.step) as usize;
        self.values.get(idx).copied().flatten()
    }

    /// Timestamp of the newest non-null slot.
    pub fn last_timestamp_with_data(&self) -> Option<i64> {
        self.values
            .iter()
            .rposition(Option::is_some)
            .map(|idx| self.timestamp_at(idx))
    }

    /// Newest non-null value.
    pub fn current(&self) -> Option<f64> {
        self.values.iter().rev().find_map(|v| *v)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().flatten().copied().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().flatten().copied().reduce(f64::min)
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn map_values(mut self, f: impl Fn(f64) -> Option<f64>) -> Self {
        for v in self.values.iter_mut() {
            *v = v.and_then(&f);
        }
        self
    }
}

/// Match a graphite pattern against a series name, one dot-separated node at
/// a time. Node globs: `*`, `?`, `[a-z]`, `{a,b}`.
///
/// # Examples
///
/// ```
/// use trigwatch_expr::series::pattern_matches;
///
/// assert!(pattern_matches("servers.*.cpu", "servers.web-01.cpu"));
/// assert!(!pattern_matches("servers.*", "servers.web-01.cpu"));
/// assert!(pattern_matches("servers.{db,web}-0[1-3].cpu", "servers.db-02.cpu"));
/// ```
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern_nodes = split_nodes(pattern);
    let name_nodes: Vec<&str> = name.split('.').collect();
    if pattern_nodes.len() != name_nodes.len() {
        return false;
    }
    pattern_nodes
        .iter()
        .zip(name_nodes)
        .all(|(p, n)| if is_glob(p) { glob_match::glob_match(p, n) } else { *p == n })
}

pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Split on dots that are not inside `{...}`.
fn split_nodes(pattern: &str) -> Vec<&str> {
    let mut nodes = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, c) in pattern.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                nodes.push(&pattern[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    nodes.push(&pattern[start..]);
    nodes
}
