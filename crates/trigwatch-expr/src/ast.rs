/// Parsed target expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Series path, possibly containing per-node globs.
    Path { pattern: String, position: usize },
    Call {
        name: String,
        args: Vec<Arg>,
        position: usize,
    },
    Number { value: f64, position: usize },
    Str { value: String, position: usize },
    Bool { value: bool, position: usize },
}

/// Function argument, optionally passed by keyword (`name=value`).
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

/// A function call site found while walking an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub name: String,
    pub position: usize,
    /// Nesting depth, 0 for the outermost call.
    pub depth: usize,
}

impl Expr {
    pub fn position(&self) -> usize {
        match self {
            Self::Path { position, .. }
            | Self::Call { position, .. }
            | Self::Number { position, .. }
            | Self::Str { position, .. }
            | Self::Bool { position, .. } => *position,
        }
    }

    /// Series patterns referenced anywhere in the expression, in source
    /// order and without duplicates.
    pub fn paths(&self) -> Vec<String> {
        self.path_sites().into_iter().map(|(p, _)| p).collect()
    }

    /// Like [`Expr::paths`], paired with the position of the first
    /// occurrence of each pattern.
    pub fn path_sites(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = Vec::new();
        self.collect_path_sites(&mut out);
        out
    }

    fn collect_path_sites(&self, out: &mut Vec<(String, usize)>) {
        match self {
            Self::Path { pattern, position } => {
                if !out.iter().any(|(p, _)| p == pattern) {
                    out.push((pattern.clone(), *position));
                }
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.value.collect_path_sites(out);
                }
            }
            _ => {}
        }
    }

    /// Every function call in pre-order.
    pub fn functions(&self) -> Vec<CallSite> {
        let mut out = Vec::new();
        self.collect_calls(0, &mut out);
        out
    }

    fn collect_calls(&self, depth: usize, out: &mut Vec<CallSite>) {
        if let Self::Call {
            name,
            args,
            position,
        } = self
        {
            out.push(CallSite {
                name: name.clone(),
                position: *position,
                depth,
            });
            for arg in args {
                arg.value.collect_calls(depth + 1, out);
            }
        }
    }

    /// Short human label used in series names and problem trees.
    pub fn label(&self) -> String {
        match self {
            Self::Path { pattern, .. } => pattern.clone(),
            Self::Call { name, args, .. } => {
                let inner: Vec<String> = args
                    .iter()
                    .map(|a| match &a.name {
                        Some(n) => format!("{n}={}", a.value.label()),
                        None => a.value.label(),
                    })
                    .collect();
                format!("{name}({})", inner.join(","))
            }
            Self::Number { value, .. } => format_number(*value),
            Self::Str { value, .. } => format!("'{value}'"),
            Self::Bool { value, .. } => value.to_string(),
        }
    }
}

pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
