//! Collaboration error taxonomy.
//!
//! Every operation in the presence and thread-exchange protocol fails with
//! one of these variants. Successful operations are full replacements, so
//! every variant is safe for the caller to retry.

use std::time::Duration;

use thiserror::Error;

/// Caller is not a member of the room or project.
pub const FORBIDDEN: &str = "FORBIDDEN";
/// Malformed or oversized fields; the whole batch was rejected.
pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
/// Publish quota exhausted.
pub const RATE_LIMITED: &str = "RATE_LIMITED";
/// The project host has no live connection.
pub const HOST_UNAVAILABLE: &str = "HOST_UNAVAILABLE";
/// The host did not answer within the relay window.
pub const TIMEOUT: &str = "TIMEOUT";
/// A relayed payload was larger than allowed.
pub const SIZE_EXCEEDED: &str = "SIZE_EXCEEDED";
/// The host does not know the requested thread.
pub const THREAD_NOT_FOUND: &str = "THREAD_NOT_FOUND";

/// Errors produced by the collaboration protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollabError {
    /// Caller is not an active member of the room or project.
    #[error("not a member of this room or project")]
    Forbidden,

    /// A field violated a limit or a membership constraint.
    #[error("validation failed: {message}")]
    ValidationFailed {
        /// Which constraint was violated.
        message: String,
    },

    /// The per-connection publish quota is exhausted.
    #[error("rate limited, retry after {}ms", retry_after.as_millis())]
    RateLimited {
        /// How long until a token is available.
        retry_after: Duration,
    },

    /// The project host connection is known to be absent.
    #[error("project host is unavailable")]
    HostUnavailable,

    /// No host response arrived within the relay window.
    #[error("host did not respond in time")]
    Timeout,

    /// A payload exceeded its size cap.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    SizeExceeded {
        /// Actual size in bytes.
        size: usize,
        /// Allowed size in bytes.
        limit: usize,
    },

    /// The host reported that it has no such thread.
    #[error("{message}")]
    NotFound {
        /// Host-provided description.
        message: String,
    },
}

impl CollabError {
    /// Shorthand for a [`CollabError::ValidationFailed`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// Machine-readable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden => FORBIDDEN,
            Self::ValidationFailed { .. } => VALIDATION_FAILED,
            Self::RateLimited { .. } => RATE_LIMITED,
            Self::HostUnavailable => HOST_UNAVAILABLE,
            Self::Timeout => TIMEOUT,
            Self::SizeExceeded { .. } => SIZE_EXCEEDED,
            Self::NotFound { .. } => THREAD_NOT_FOUND,
        }
    }

    /// Whether retrying the same call later can succeed without the caller
    /// changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::HostUnavailable | Self::Timeout
        )
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::ValidationFailed { .. } => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::HostUnavailable => "host_unavailable",
            Self::Timeout => "timeout",
            Self::SizeExceeded { .. } => "size_exceeded",
            Self::NotFound { .. } => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CollabError::Forbidden.code(), "FORBIDDEN");
        assert_eq!(CollabError::validation("x").code(), "VALIDATION_FAILED");
        assert_eq!(
            CollabError::RateLimited {
                retry_after: Duration::from_millis(5)
            }
            .code(),
            "RATE_LIMITED"
        );
        assert_eq!(CollabError::HostUnavailable.code(), "HOST_UNAVAILABLE");
        assert_eq!(CollabError::Timeout.code(), "TIMEOUT");
        assert_eq!(
            CollabError::SizeExceeded { size: 2, limit: 1 }.code(),
            "SIZE_EXCEEDED"
        );
    }

    #[test]
    fn rate_limited_display_includes_retry_hint() {
        let err = CollabError::RateLimited {
            retry_after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 250ms");
    }

    #[test]
    fn validation_display_includes_message() {
        let err = CollabError::validation("title exceeds 256 bytes");
        assert!(err.to_string().contains("title exceeds 256 bytes"));
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(CollabError::Timeout.is_retryable());
        assert!(CollabError::HostUnavailable.is_retryable());
        assert!(!CollabError::Forbidden.is_retryable());
        assert!(!CollabError::validation("bad").is_retryable());
    }

    #[test]
    fn size_exceeded_display() {
        let err = CollabError::SizeExceeded { size: 10, limit: 4 };
        assert_eq!(err.to_string(), "payload of 10 bytes exceeds limit of 4 bytes");
    }
}
