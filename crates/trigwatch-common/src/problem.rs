use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Type of a node in a target's problem tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    Ok,
    ParseError,
    EvalError,
    UnknownFunctionError,
    InvalidExpression,
    RemoteUnavailable,
    RemoteBadResponse,
    InternalError,
    /// Newest data point of a series is older than the TTL.
    NoData,
    /// Function is evaluable but known to cause false notifications.
    UnstableFunction,
}

impl ProblemKind {
    pub fn is_error(self) -> bool {
        !matches!(self, Self::Ok | Self::NoData | Self::UnstableFunction)
    }
}

/// One node of a problem tree. `position` is the byte offset of `argument`
/// inside the target string (0 for nodes that describe the whole target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProblemNode {
    pub kind: ProblemKind,
    pub argument: String,
    pub description: String,
    pub position: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schema(no_recursion)]
    pub problems: Vec<ProblemNode>,
}

impl ProblemNode {
    pub fn ok(argument: impl Into<String>) -> Self {
        Self::new(ProblemKind::Ok, argument, "", 0)
    }

    pub fn new(
        kind: ProblemKind,
        argument: impl Into<String>,
        description: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            kind,
            argument: argument.into(),
            description: description.into(),
            position,
            problems: Vec::new(),
        }
    }

    pub fn with_problems(mut self, problems: Vec<ProblemNode>) -> Self {
        self.problems = problems;
        self
    }

    /// True when this node or any descendant is error-typed.
    pub fn has_error(&self) -> bool {
        self.kind.is_error() || self.problems.iter().any(ProblemNode::has_error)
    }

    /// Depth-first search for the first error-typed node.
    pub fn first_error(&self) -> Option<&ProblemNode> {
        if self.kind.is_error() {
            return Some(self);
        }
        self.problems.iter().find_map(ProblemNode::first_error)
    }

    /// Number of nodes (including this one) whose kind is `kind`.
    pub fn count(&self, kind: ProblemKind) -> usize {
        usize::from(self.kind == kind)
            + self.problems.iter().map(|p| p.count(kind)).sum::<usize>()
    }
}

/// Verification result for a single target expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TargetVerification {
    pub target: String,
    /// False only when the target could not be parsed.
    pub syntax_ok: bool,
    pub tree: ProblemNode,
}

impl TargetVerification {
    pub fn is_passing(&self) -> bool {
        !self.tree.has_error()
    }
}

/// True if at least one tree contains an error-typed node.
///
/// # Examples
///
/// ```
/// use trigwatch_common::problem::{
///     does_any_tree_have_error, ProblemKind, ProblemNode, TargetVerification,
/// };
///
/// let passing = TargetVerification {
///     target: "a.b".into(),
///     syntax_ok: true,
///     tree: ProblemNode::ok("a.b")
///         .with_problems(vec![ProblemNode::new(ProblemKind::NoData, "a.b", "stale", 0)]),
/// };
/// assert!(!does_any_tree_have_error(std::slice::from_ref(&passing)));
///
/// let failing = TargetVerification {
///     target: "a.b(".into(),
///     syntax_ok: false,
///     tree: ProblemNode::new(ProblemKind::ParseError, "a.b(", "unexpected end", 4),
/// };
/// assert!(does_any_tree_have_error(&[passing, failing]));
/// ```
pub fn does_any_tree_have_error(trees: &[TargetVerification]) -> bool {
    trees.iter().any(|t| !t.is_passing())
}
