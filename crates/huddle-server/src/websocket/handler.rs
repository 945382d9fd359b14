//! WebSocket message dispatch: parses incoming text as `RpcRequest` and
//! routes it through the `MethodRegistry`.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::membership::PeerIdentity;
use crate::rpc::context::RpcContext;
use crate::rpc::errors;
use crate::rpc::registry::MethodRegistry;
use crate::rpc::types::{RpcRequest, RpcResponse};

/// Methods that wait on another participant and must not hold up the
/// caller's inbound loop.
const RELAY_METHODS: &[&str] = &["agentThread.open", "agentThreads.synchronize"];

/// Whether `method` waits on a host reply.
pub fn is_relay_method(method: &str) -> bool {
    RELAY_METHODS.contains(&method)
}

/// Parse one text frame.
///
/// A frame that is not a request yields the error response to send back,
/// echoing the request id when one can be recovered.
pub fn parse_request(message: &str) -> Result<RpcRequest, RpcResponse> {
    serde_json::from_str(message).map_err(|e| {
        warn!("invalid request frame received");
        let id = serde_json::from_str::<Value>(message)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(ToOwned::to_owned))
            .unwrap_or_else(|| "unknown".to_owned());
        RpcResponse::error(id, errors::INVALID_PARAMS, format!("Invalid JSON: {e}"))
    })
}

/// Dispatch a parsed request on behalf of `caller` and serialize the
/// response.
#[instrument(skip_all, fields(method = %request.method, id = %request.id))]
pub async fn dispatch_request(
    request: RpcRequest,
    caller: &PeerIdentity,
    registry: &MethodRegistry,
    ctx: &RpcContext,
) -> String {
    if !registry.has_method(&request.method) {
        warn!("unknown RPC method");
    }
    debug!("dispatching RPC");
    let response = registry.dispatch(request, caller, ctx).await;
    encode_response(&response)
}

/// Serialize a response for the wire.
pub fn encode_response(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize response");
        String::new()
    })
}
