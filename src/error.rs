//! Crate-wide error type and the wire error-code vocabulary (spec §6).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Uppercase, underscore-separated error codes both ends of the protocol
/// MUST recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "BAD_REQUEST")]
    BadRequest,
    #[serde(rename = "UNSUPPORTED_VERSION")]
    UnsupportedVersion,
    #[serde(rename = "AUTH_REQUIRED")]
    AuthRequired,
    #[serde(rename = "AUTH_FAILED")]
    AuthFailed,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "READ_ONLY")]
    ReadOnly,
    #[serde(rename = "PATH_TRAVERSAL")]
    PathTraversal,
    #[serde(rename = "IO_ERROR")]
    IoError,
    #[serde(rename = "INTEGRITY_FAILED")]
    IntegrityFailed,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "INVALID_RANGE")]
    InvalidRange,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ReadOnly => "READ_ONLY",
            ErrorCode::PathTraversal => "PATH_TRAVERSAL",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::IntegrityFailed => "INTEGRITY_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::InvalidRange => "INVALID_RANGE",
        }
    }
}

/// Library-facing error type. Every variant maps onto one [`ErrorCode`]
/// so session handlers can turn a `Result<_, NetShareError>` directly into
/// an envelope `error` object.
#[derive(Debug, Error)]
pub enum NetShareError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("authentication failed")]
    AuthFailed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("share is read-only")]
    ReadOnly,

    #[error("path escapes share root: {0}")]
    PathTraversal(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("integrity check failed: {0}")]
    IntegrityFailed(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl NetShareError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NetShareError::BadRequest(_) => ErrorCode::BadRequest,
            NetShareError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            NetShareError::AuthRequired => ErrorCode::AuthRequired,
            NetShareError::AuthFailed => ErrorCode::AuthFailed,
            NetShareError::NotFound(_) => ErrorCode::NotFound,
            NetShareError::ReadOnly => ErrorCode::ReadOnly,
            NetShareError::PathTraversal(_) => ErrorCode::PathTraversal,
            NetShareError::Io(_) => ErrorCode::IoError,
            NetShareError::IntegrityFailed(_) => ErrorCode::IntegrityFailed,
            NetShareError::Internal(_) => ErrorCode::InternalError,
            NetShareError::InvalidRange(_) => ErrorCode::InvalidRange,
            NetShareError::Transport(_) => ErrorCode::InternalError,
        }
    }
}

impl From<std::io::Error> for NetShareError {
    fn from(e: std::io::Error) -> Self {
        NetShareError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NetShareError>;
