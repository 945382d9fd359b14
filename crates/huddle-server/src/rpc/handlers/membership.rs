//! Room and project membership handlers.
//!
//! These drive the membership records that every other handler consults,
//! and hand the resulting reports to the lifecycle reaper.

use async_trait::async_trait;
use huddle_core::{ProjectId, RoomId};
use serde_json::{Value, json};
use tracing::instrument;

use crate::membership::PeerIdentity;
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::handlers::require_id;
use crate::rpc::registry::MethodHandler;
use crate::rpc::types::{PRESENCE_UPDATED, RpcEvent};

/// Join a room, leaving the previous one, and replay the room's presence.
pub struct JoinRoomHandler;

#[async_trait]
impl MethodHandler for JoinRoomHandler {
    #[instrument(skip_all, fields(method = "room.join", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let room_id: RoomId = require_id(params.as_ref(), "roomId")?;

        if let Some(previous) = ctx.membership.join_room(&caller.peer_id, &room_id)? {
            ctx.reaper.on_room_left(&previous);
        }

        let replay = ctx.presence.room_snapshots(&room_id, &caller.peer_id);
        for update in &replay {
            let _ = ctx
                .peers
                .send_to(&caller.peer_id, &RpcEvent::from_payload(PRESENCE_UPDATED, update));
        }

        Ok(json!({
            "roomId": room_id,
            "replayed": replay.len(),
        }))
    }
}

/// Leave a room.
pub struct LeaveRoomHandler;

#[async_trait]
impl MethodHandler for LeaveRoomHandler {
    #[instrument(skip_all, fields(method = "room.leave", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let room_id: RoomId = require_id(params.as_ref(), "roomId")?;
        let report = ctx.membership.leave_room(&caller.peer_id, &room_id)?;
        ctx.reaper.on_room_left(&report);
        Ok(json!({
            "left": true,
            "unshared": report.unshared.len(),
        }))
    }
}

/// Share a project in the caller's room, as its host.
pub struct ShareProjectHandler;

#[async_trait]
impl MethodHandler for ShareProjectHandler {
    #[instrument(skip_all, fields(method = "project.share", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let room_id: RoomId = require_id(params.as_ref(), "roomId")?;
        let project_id: ProjectId = require_id(params.as_ref(), "projectId")?;
        ctx.membership
            .share_project(&caller.peer_id, &room_id, &project_id)?;
        Ok(json!({ "shared": true }))
    }
}

/// Stop sharing a project.
pub struct UnshareProjectHandler;

#[async_trait]
impl MethodHandler for UnshareProjectHandler {
    #[instrument(skip_all, fields(method = "project.unshare", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let project_id: ProjectId = require_id(params.as_ref(), "projectId")?;
        let report = ctx.membership.unshare_project(&caller.peer_id, &project_id)?;
        ctx.reaper.on_project_unshared(&report);
        Ok(json!({
            "unshared": true,
            "guests": report.guests.len(),
        }))
    }
}

/// Join a project as a guest; the cached thread metadata follows as an
/// event.
pub struct JoinProjectHandler;

#[async_trait]
impl MethodHandler for JoinProjectHandler {
    #[instrument(skip_all, fields(method = "project.join", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let project_id: ProjectId = require_id(params.as_ref(), "projectId")?;
        let host = ctx.membership.join_project(&caller.peer_id, &project_id)?;
        let cached = ctx.metadata.serve_cached(&project_id, &caller.peer_id);
        Ok(json!({
            "projectId": project_id,
            "roomId": host.room_id,
            "hostPeerId": host.peer.peer_id,
            "hostUserId": host.peer.user_id,
            "cached": cached,
        }))
    }
}

/// Leave a joined project.
pub struct LeaveProjectHandler;

#[async_trait]
impl MethodHandler for LeaveProjectHandler {
    #[instrument(skip_all, fields(method = "project.leave", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let project_id: ProjectId = require_id(params.as_ref(), "projectId")?;
        ctx.membership.leave_project(&caller.peer_id, &project_id)?;
        ctx.reaper.on_project_left(&caller.peer_id, &project_id);
        Ok(json!({ "left": true }))
    }
}
