use std::time::Duration;

use trigwatch_common::error::ErrorKind;
use trigwatch_expr::ExprError;

/// Errors returned by metric sources.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use trigwatch_common::error::ErrorKind;
/// use trigwatch_source::SourceError;
///
/// let err = SourceError::RemoteUnavailable {
///     timeout: Duration::from_secs(60),
///     path: "/render".into(),
///     cause: "connection refused".into(),
/// };
/// assert_eq!(err.kind(), ErrorKind::RemoteUnavailable);
/// assert!(err.to_string().contains("/render"));
/// assert!(err.to_string().contains("60s"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// The trigger needs the remote source but none is configured.
    #[error("Source: remote source is not configured")]
    RemoteNotConfigured,

    /// The remote client could not be built or the request is malformed.
    #[error("Source: invalid remote configuration: {0}")]
    InvalidConfig(String),

    /// No response was received: timeout, refused or reset connection,
    /// DNS failure.
    #[error(
        "Source: remote server is not available or the response was reset by timeout. \
         timeout: {timeout:?}, path: {path}, error: {cause}"
    )]
    RemoteUnavailable {
        timeout: Duration,
        path: String,
        cause: String,
    },

    /// The remote answered with a status other than 200.
    #[error("Source: bad response status {status}: {body}")]
    RemoteBadResponse { status: u16, body: String },

    /// The remote answered 200 with a payload that does not decode.
    #[error("Source: cannot decode remote payload: {cause}")]
    BadPayload { cause: String, body: String },

    #[error("Source: {0}")]
    Expr(#[from] ExprError),

    /// The local metric store failed.
    #[error("Source: local store error: {0}")]
    Store(String),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RemoteNotConfigured => ErrorKind::SourceNotConfigured,
            Self::InvalidConfig(_) => ErrorKind::InternalError,
            Self::RemoteUnavailable { .. } => ErrorKind::RemoteUnavailable,
            Self::RemoteBadResponse { .. } | Self::BadPayload { .. } => {
                ErrorKind::RemoteBadResponse
            }
            Self::Expr(e) => e.kind(),
            Self::Store(_) => ErrorKind::BackingStoreUnavailable,
        }
    }

    /// HTTP status the remote answered with, if one was received.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            Self::RemoteBadResponse { status, .. } => Some(*status),
            Self::BadPayload { .. } => Some(200),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::RemoteUnavailable { timeout, .. } => Some(*timeout),
            _ => None,
        }
    }
}

/// Convenience `Result` alias for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
