use std::io;

use http::StatusCode;
use loom_http::protocol::{HttpError, ParseError, SendError};
use thiserror::Error;

use crate::lock::LockError;
use crate::range::RangeError;

/// Failures of a WebDAV operation.
///
/// Everything but [`DavError::Http`] is answered with [`DavError::status`]; transport and
/// framing failures go back to the connection loop.
#[derive(Debug, Error)]
pub enum DavError {
    #[error("resource not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("method not allowed on this resource")]
    MethodNotAllowed,

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("resource is locked")]
    Locked,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("destination is not served here: {0}")]
    BadGateway(String),

    #[error("invalid xml body: {0}")]
    Xml(String),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("storage error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error(transparent)]
    Http(#[from] HttpError),
}

impl DavError {
    pub fn conflict<S: ToString>(reason: S) -> Self {
        Self::Conflict(reason.to_string())
    }

    pub fn forbidden<S: ToString>(reason: S) -> Self {
        Self::Forbidden(reason.to_string())
    }

    pub fn bad_request<S: ToString>(reason: S) -> Self {
        Self::BadRequest(reason.to_string())
    }

    pub fn precondition_failed<S: ToString>(reason: S) -> Self {
        Self::PreconditionFailed(reason.to_string())
    }

    /// The status the failure is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::Locked => StatusCode::LOCKED,
            Self::BadRequest(_) | Self::Xml(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Range(e) => e.status(),
            Self::Lock(e) => e.status(),
            Self::Io { source } => match source.kind() {
                io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
                io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                io::ErrorKind::AlreadyExists => StatusCode::METHOD_NOT_ALLOWED,
                io::ErrorKind::DirectoryNotEmpty => StatusCode::CONFLICT,
                io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SendError> for DavError {
    fn from(e: SendError) -> Self {
        Self::Http(e.into())
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        Self::Http(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(DavError::Locked.status(), StatusCode::LOCKED);
        assert_eq!(DavError::precondition_failed("token").status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(DavError::from(LockError::Conflict).status(), StatusCode::LOCKED);
        assert_eq!(DavError::from(RangeError::MultipleRanges).status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(DavError::from(io::Error::from(io::ErrorKind::NotFound)).status(), StatusCode::NOT_FOUND);
        assert_eq!(DavError::from(io::Error::other("disk")).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
