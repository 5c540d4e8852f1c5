use std::time::Duration;

use trigwatch_common::error::ErrorKind;
use trigwatch_common::problem::TargetVerification;
use trigwatch_source::SourceError;
use trigwatch_storage::StorageError;
use trigwatch_verify::{BindError, VerifyError};

use crate::search::SearchError;

/// Failure of a controller operation, classified by [`AppError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Verification was requested and at least one target tree failed.
    #[error("Invalid request: target verification failed")]
    TargetsInvalid(Vec<TargetVerification>),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::TargetsInvalid(_) => ErrorKind::InvalidRequest,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Bind(e) => e.kind(),
            Self::Verify(e) => e.kind(),
            Self::Source(e) => e.kind(),
            Self::Storage(e) => e.kind(),
            Self::Search(_) => ErrorKind::InternalError,
        }
    }

    fn source_error(&self) -> Option<&SourceError> {
        match self {
            Self::Source(e) | Self::Bind(BindError::Source(e)) => Some(e),
            _ => None,
        }
    }

    /// HTTP status returned by the remote API, when the failure came from it.
    pub fn remote_status(&self) -> Option<u16> {
        self.source_error().and_then(SourceError::remote_status)
    }

    /// Client timeout of the remote call that failed.
    pub fn remote_timeout(&self) -> Option<Duration> {
        self.source_error().and_then(SourceError::timeout)
    }
}
