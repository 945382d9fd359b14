//! RPC error codes and error type.

use huddle_core::CollabError;
use serde_json::json;

use crate::membership::MembershipError;
use crate::rpc::types::RpcErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Resource or feature not available.
pub const NOT_AVAILABLE: &str = "NOT_AVAILABLE";
/// Project is not shared by anyone.
pub const PROJECT_NOT_FOUND: &str = "PROJECT_NOT_FOUND";
/// Project is already shared by another participant.
pub const ALREADY_SHARED: &str = "ALREADY_SHARED";

/// RPC error type returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Requested resource not found.
    #[error("{message}")]
    NotFound {
        /// Specific error code (e.g. `PROJECT_NOT_FOUND`).
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Feature or resource not available.
    #[error("{message}")]
    NotAvailable {
        /// Description.
        message: String,
    },

    /// Domain-specific error with arbitrary code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<serde_json::Value>,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::NotFound { code, .. } | Self::Custom { code, .. } => code,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::NotAvailable { .. } => NOT_AVAILABLE,
        }
    }

    /// Convert to the wire-format error body.
    ///
    /// Internal details never reach the client.
    pub fn to_error_body(&self) -> RpcErrorBody {
        RpcErrorBody {
            code: self.code().to_owned(),
            message: crate::rpc::validation::sanitize_error_message(self),
            details: match self {
                Self::Custom { details, .. } => details.clone(),
                _ => None,
            },
        }
    }
}

impl From<CollabError> for RpcError {
    fn from(err: CollabError) -> Self {
        let mut details = json!({ "retryable": err.is_retryable() });
        match &err {
            CollabError::RateLimited { retry_after } => {
                let ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                details["retryAfterMs"] = json!(ms);
            }
            CollabError::SizeExceeded { size, limit } => {
                details["size"] = json!(size);
                details["limit"] = json!(limit);
            }
            _ => {}
        }
        Self::Custom {
            code: err.code().to_owned(),
            message: err.to_string(),
            details: Some(details),
        }
    }
}

impl From<MembershipError> for RpcError {
    fn from(err: MembershipError) -> Self {
        match err {
            MembershipError::UnknownProject(_) => Self::NotFound {
                code: PROJECT_NOT_FOUND.into(),
                message: err.to_string(),
            },
            MembershipError::AlreadyShared(_) => Self::Custom {
                code: ALREADY_SHARED.into(),
                message: err.to_string(),
                details: None,
            },
            MembershipError::UnknownPeer(_) => Self::Internal {
                message: err.to_string(),
            },
            MembershipError::NotInRoom(_)
            | MembershipError::NotHost(_)
            | MembershipError::NotGuest(_)
            | MembershipError::DifferentRoom(_) => Self::Custom {
                code: huddle_core::errors::FORBIDDEN.into(),
                message: err.to_string(),
                details: None,
            },
        }
    }
}
