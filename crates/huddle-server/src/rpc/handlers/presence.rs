//! Presence publish handler.

use async_trait::async_trait;
use huddle_core::{AgentSession, RoomId};
use serde_json::{Value, json};
use tracing::instrument;

use crate::membership::PeerIdentity;
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::handlers::{parse_param, require_id};
use crate::rpc::registry::MethodHandler;

/// Replace the caller's session set in a room.
///
/// An empty `sessions` list is a valid publish meaning "no agent work".
pub struct UpdatePresenceHandler;

#[async_trait]
impl MethodHandler for UpdatePresenceHandler {
    #[instrument(skip_all, fields(method = "agentPresence.update", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let room_id: RoomId = require_id(params.as_ref(), "roomId")?;
        let sessions: Vec<AgentSession> = parse_param(params.as_ref(), "sessions")?;
        let generation = ctx.presence.publish(&room_id, caller, sessions)?;
        Ok(json!({ "generation": generation }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::membership::JoinRoomHandler;
    use crate::rpc::handlers::test_helpers::{connect_peer, drain_events, make_test_context};

    #[tokio::test]
    async fn publish_returns_generation() {
        let ctx = make_test_context();
        let (alice, _a) = connect_peer(&ctx, "alice");
        let (bob, mut bob_rx) = connect_peer(&ctx, "bob");
        for peer in [&alice, &bob] {
            let _ = JoinRoomHandler
                .handle(Some(json!({"roomId": "r"})), peer, &ctx)
                .await
                .unwrap();
        }

        let params = json!({
            "roomId": "r",
            "sessions": [{"id": "s1", "title": "Refactor", "status": "generating"}],
        });
        let result = UpdatePresenceHandler
            .handle(Some(params), &alice, &ctx)
            .await
            .unwrap();
        assert_eq!(result["generation"], 1);

        let events = drain_events(&mut bob_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["data"]["sessions"][0]["status"], "generating");
    }

    #[tokio::test]
    async fn non_member_publish_is_forbidden() {
        let ctx = make_test_context();
        let (alice, _a) = connect_peer(&ctx, "alice");
        let err = UpdatePresenceHandler
            .handle(Some(json!({"roomId": "r", "sessions": []})), &alice, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn absolute_path_is_validation_failure() {
        let ctx = make_test_context();
        let (alice, _a) = connect_peer(&ctx, "alice");
        let _ = JoinRoomHandler
            .handle(Some(json!({"roomId": "r"})), &alice, &ctx)
            .await
            .unwrap();
        let params = json!({
            "roomId": "r",
            "sessions": [{"id": "s1", "title": "t", "relativePath": "/etc/passwd"}],
        });
        let err = UpdatePresenceHandler
            .handle(Some(params), &alice, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert_eq!(err.to_error_body().details.unwrap()["retryable"], false);
    }

    #[tokio::test]
    async fn missing_sessions_is_invalid_params() {
        let ctx = make_test_context();
        let (alice, _a) = connect_peer(&ctx, "alice");
        let err = UpdatePresenceHandler
            .handle(Some(json!({"roomId": "r"})), &alice, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }
}
