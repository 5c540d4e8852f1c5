use trigwatch_common::error::ErrorKind;
use trigwatch_source::SourceError;

/// Errors that abort a whole verification call. Per-target failures are
/// reported inside the problem trees instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyError {
    #[error("Verify: remote source is not configured")]
    SourceNotConfigured,
}

impl VerifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceNotConfigured => ErrorKind::SourceNotConfigured,
        }
    }
}

/// Errors raised while binding a trigger definition.
///
/// # Examples
///
/// ```rust
/// use trigwatch_common::error::ErrorKind;
/// use trigwatch_verify::BindError;
///
/// let err = BindError::InvalidExpression("warn_value must be less than error_value".into());
/// assert_eq!(err.kind(), ErrorKind::InvalidExpression);
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Fetching a target on the trigger's source failed.
    #[error("{0}")]
    Source(#[from] SourceError),
}

impl BindError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::InvalidExpression(_) => ErrorKind::InvalidExpression,
            Self::Source(e) => e.kind(),
        }
    }

    /// Bind failures the dry-run check tolerates: the same problems show up
    /// in the problem trees it returns.
    pub fn is_target_problem(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ParseError
                | ErrorKind::EvalError
                | ErrorKind::UnknownFunctionError
                | ErrorKind::InvalidExpression
        )
    }
}

pub type Result<T> = std::result::Result<T, BindError>;
