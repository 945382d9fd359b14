//! System handlers.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::membership::PeerIdentity;
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;

/// Returns a pong with the current server timestamp.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    #[instrument(skip_all, fields(method = "system.ping"))]
    async fn handle(
        &self,
        _params: Option<Value>,
        _caller: &PeerIdentity,
        _ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        Ok(serde_json::json!({
            "pong": true,
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }))
    }
}
