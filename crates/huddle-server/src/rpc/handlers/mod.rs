//! RPC handler modules and registration.

pub mod membership;
pub mod presence;
pub mod system;
pub mod threads;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodRegistry;
use crate::rpc::validation::validate_id_param;

/// Register all RPC handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    // System
    registry.register("system.ping", system::PingHandler);

    // Membership
    registry.register("room.join", membership::JoinRoomHandler);
    registry.register("room.leave", membership::LeaveRoomHandler);
    registry.register("project.share", membership::ShareProjectHandler);
    registry.register("project.unshare", membership::UnshareProjectHandler);
    registry.register("project.join", membership::JoinProjectHandler);
    registry.register("project.leave", membership::LeaveProjectHandler);

    // Presence
    registry.register("agentPresence.update", presence::UpdatePresenceHandler);

    // Threads
    registry.register("agentThreads.advertise", threads::AdvertiseHandler);
    registry.register("agentThread.open", threads::OpenThreadHandler);
    registry.register("agentThreads.synchronize", threads::SynchronizeHandler);
    registry.register("agentThread.respondOpen", threads::RespondOpenHandler);
    registry.register(
        "agentThreads.respondSynchronize",
        threads::RespondSynchronizeHandler,
    );
}

/// Extract a required parameter from the params object.
pub(crate) fn require_param<'a>(
    params: Option<&'a Value>,
    key: &str,
) -> Result<&'a Value, RpcError> {
    params
        .and_then(|p| p.get(key))
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Missing required parameter: {key}"),
        })
}

/// Extract a required string parameter.
pub(crate) fn require_string_param(params: Option<&Value>, key: &str) -> Result<String, RpcError> {
    require_param(params, key)?
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Parameter '{key}' must be a string"),
        })
}

/// Extract a required, non-empty id parameter into its branded type.
pub(crate) fn require_id<T: From<String>>(params: Option<&Value>, key: &str) -> Result<T, RpcError> {
    let value = require_string_param(params, key)?;
    validate_id_param(&value, key)?;
    Ok(T::from(value))
}

/// Deserialize a required parameter into `T`.
pub(crate) fn parse_param<T: DeserializeOwned>(
    params: Option<&Value>,
    key: &str,
) -> Result<T, RpcError> {
    T::deserialize(require_param(params, key)?).map_err(|e| RpcError::InvalidParams {
        message: format!("Invalid parameter '{key}': {e}"),
    })
}
