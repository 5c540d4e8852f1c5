use serde::{Deserialize, Serialize};

/// Classification carried by every failure that can reach a caller.
///
/// Library errors (`SourceError`, `StorageError`, ...) each expose a
/// `kind()` that maps every variant to exactly one entry here; the HTTP layer
/// only ever looks at the kind when choosing a status code.
///
/// # Examples
///
/// ```
/// use trigwatch_common::error::ErrorKind;
///
/// assert!(ErrorKind::ParseError.is_client_error());
/// assert!(!ErrorKind::RemoteUnavailable.is_client_error());
/// assert!(!ErrorKind::SourceNotConfigured.is_client_error());
/// assert_eq!(ErrorKind::EvalError.to_string(), "eval_error");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    InvalidExpression,
    ParseError,
    EvalError,
    UnknownFunctionError,
    /// The trigger needs the remote source but this server has none.
    SourceNotConfigured,
    RemoteUnavailable,
    RemoteBadResponse,
    BackingStoreUnavailable,
    NotFound,
    Conflict,
    InternalError,
}

impl ErrorKind {
    /// Kinds caused by the request content itself; never retried.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            Self::InvalidRequest
                | Self::InvalidExpression
                | Self::ParseError
                | Self::EvalError
                | Self::UnknownFunctionError
        )
    }

    /// Kinds produced by the target expression engine.
    pub fn is_target_error(self) -> bool {
        matches!(
            self,
            Self::ParseError | Self::EvalError | Self::UnknownFunctionError
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidExpression => "invalid_expression",
            Self::ParseError => "parse_error",
            Self::EvalError => "eval_error",
            Self::UnknownFunctionError => "unknown_function_error",
            Self::SourceNotConfigured => "source_not_configured",
            Self::RemoteUnavailable => "remote_unavailable",
            Self::RemoteBadResponse => "remote_bad_response",
            Self::BackingStoreUnavailable => "backing_store_unavailable",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InternalError => "internal_error",
        };
        f.write_str(s)
    }
}
