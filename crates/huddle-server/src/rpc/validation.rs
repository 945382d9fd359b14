//! Input validation helpers for RPC parameters.

use super::errors::RpcError;

/// Maximum length of an id parameter (room, project, session, request).
pub const MAX_ID_LENGTH: usize = 256;

/// Validate that a string parameter does not exceed `max_len` bytes.
pub fn validate_string_param(value: &str, name: &str, max_len: usize) -> Result<(), RpcError> {
    if value.len() > max_len {
        return Err(RpcError::InvalidParams {
            message: format!(
                "Parameter '{name}' exceeds maximum length ({} > {max_len})",
                value.len()
            ),
        });
    }
    Ok(())
}

/// Validate an id parameter: non-empty and at most [`MAX_ID_LENGTH`] bytes.
pub fn validate_id_param(value: &str, name: &str) -> Result<(), RpcError> {
    if value.is_empty() {
        return Err(RpcError::InvalidParams {
            message: format!("Parameter '{name}' must not be empty"),
        });
    }
    validate_string_param(value, name, MAX_ID_LENGTH)
}

/// Sanitize an error message for client consumption.
///
/// Preserves user-facing messages but strips internal details from internal
/// errors.
pub fn sanitize_error_message(err: &RpcError) -> String {
    match err {
        RpcError::InvalidParams { message }
        | RpcError::NotFound { message, .. }
        | RpcError::NotAvailable { message }
        | RpcError::Custom { message, .. } => message.clone(),
        RpcError::Internal { .. } => "Internal error".to_string(),
    }
}
