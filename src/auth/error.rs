//! Caller-visible authentication errors.

use std::fmt;

use http::StatusCode;

/// Authentication outcome surfaced to an untrusted peer.
///
/// Token failure kinds collapse into `Unauthorized` so a client cannot tell
/// an expired token from a forged one. The distinct kind is logged where the
/// failure happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Credential rejected or subject unknown
    Unauthorized,
    /// Principal store unreachable within budget; retryable
    Unavailable,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::Unavailable => write!(f, "Authentication temporarily unavailable"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}
