use trigwatch_common::error::ErrorKind;

/// A target that does not match the expression grammar.
///
/// # Examples
///
/// ```rust
/// use trigwatch_expr::error::ParseError;
///
/// let err = ParseError::new(7, "missing ')'");
/// assert_eq!(err.to_string(), "parse error at position 7: missing ')'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Errors produced while parsing or evaluating a target expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The expression calls a function the registry does not know.
    #[error("unknown function '{name}' at position {position}")]
    UnknownFunction { name: String, position: usize },

    /// A known function received arguments it cannot evaluate.
    #[error("{function}: {message}")]
    Eval { function: String, message: String },
}

impl ExprError {
    pub fn eval(function: &str, message: impl Into<String>) -> Self {
        Self::Eval {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::ParseError,
            Self::UnknownFunction { .. } => ErrorKind::UnknownFunctionError,
            Self::Eval { .. } => ErrorKind::EvalError,
        }
    }
}

/// Convenience `Result` alias for expression operations.
pub type Result<T> = std::result::Result<T, ExprError>;
