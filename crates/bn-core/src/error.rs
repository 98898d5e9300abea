//! # AppError
//!
//! Centralized error handling for the impersonation detector. Adapters map
//! their library failures into these variants at the port boundary.

use thiserror::Error;

use crate::models::UserId;

/// The primary error type for all bn-core ports and engine operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Image container is neither a static nor an animated raster the
    /// detector understands.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Fetch, network or filesystem failure.
    #[error("i/o failure: {0}")]
    Io(String),

    /// The service lacks the capability for an operation. The orchestrator
    /// reports this as a `false` outcome rather than raising it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A moderation call failed after its permission check passed.
    #[error("{action} failed for user {user_id}: {reason}")]
    ActionFailed {
        action: &'static str,
        user_id: UserId,
        reason: String,
    },

    /// Resource not found (e.g., community config, member)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Infrastructure failure (e.g., database down)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

/// A specialized Result type for detector logic.
pub type Result<T> = std::result::Result<T, AppError>;
