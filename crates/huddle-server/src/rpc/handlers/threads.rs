//! Thread metadata and snapshot exchange handlers.
//!
//! Guests call `agentThread.open` and `agentThreads.synchronize`; the host
//! is told through an event and answers with the matching `respond*`
//! method, quoting the request id it was given.

use async_trait::async_trait;
use huddle_core::threads::base64_bytes;
use huddle_core::{AgentSessionId, ProjectId, RequestId, ThreadMetadata, ThreadRevision};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::exchange::OpenReply;
use crate::membership::PeerIdentity;
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::handlers::{parse_param, require_id};
use crate::rpc::registry::MethodHandler;

/// Replace the project's thread metadata set (host only).
pub struct AdvertiseHandler;

#[async_trait]
impl MethodHandler for AdvertiseHandler {
    #[instrument(skip_all, fields(method = "agentThreads.advertise", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let project_id: ProjectId = require_id(params.as_ref(), "projectId")?;
        let entries: Vec<ThreadMetadata> = parse_param(params.as_ref(), "entries")?;
        let count = ctx.metadata.advertise(caller, &project_id, entries)?;
        Ok(json!({ "count": count }))
    }
}

/// Fetch one thread's snapshot from the project host.
pub struct OpenThreadHandler;

#[async_trait]
impl MethodHandler for OpenThreadHandler {
    #[instrument(skip_all, fields(method = "agentThread.open", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let project_id: ProjectId = require_id(params.as_ref(), "projectId")?;
        let session_id: AgentSessionId = require_id(params.as_ref(), "sessionId")?;
        let snapshot = ctx
            .exchange
            .open_thread(caller, &project_id, &session_id)
            .await?;
        serde_json::to_value(&snapshot).map_err(|e| RpcError::Internal {
            message: e.to_string(),
        })
    }
}

/// Ask the host for authoritative revisions of the listed sessions.
pub struct SynchronizeHandler;

#[async_trait]
impl MethodHandler for SynchronizeHandler {
    #[instrument(skip_all, fields(method = "agentThreads.synchronize", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let project_id: ProjectId = require_id(params.as_ref(), "projectId")?;
        let sessions: Vec<ThreadRevision> = parse_param(params.as_ref(), "sessions")?;
        let revisions = ctx
            .exchange
            .synchronize(caller, &project_id, &sessions)
            .await?;
        Ok(json!({ "sessions": revisions }))
    }
}

#[derive(Deserialize)]
struct OpenReplyParams {
    title: String,
    #[serde(with = "base64_bytes")]
    snapshot: Vec<u8>,
    revision: u64,
}

/// A host-side failure message, when the reply carries `error` instead of
/// a payload.
fn host_error(params: Option<&Value>) -> Result<Option<String>, RpcError> {
    match params.and_then(|p| p.get("error")) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(message)) => Ok(Some(message.clone())),
        Some(_) => Err(RpcError::InvalidParams {
            message: "Parameter 'error' must be a string".into(),
        }),
    }
}

/// Host answer to `agentThread.openRequested`.
pub struct RespondOpenHandler;

#[async_trait]
impl MethodHandler for RespondOpenHandler {
    #[instrument(skip_all, fields(method = "agentThread.respondOpen", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let request_id: RequestId = require_id(params.as_ref(), "requestId")?;
        let reply = match host_error(params.as_ref())? {
            Some(message) => Err(message),
            None => {
                let body = params.as_ref().ok_or_else(|| RpcError::InvalidParams {
                    message: "Missing reply payload".into(),
                })?;
                let parsed =
                    OpenReplyParams::deserialize(body).map_err(|e| RpcError::InvalidParams {
                        message: format!("Invalid open reply: {e}"),
                    })?;
                Ok(OpenReply {
                    title: parsed.title,
                    snapshot: parsed.snapshot,
                    revision: parsed.revision,
                })
            }
        };
        let delivered = ctx
            .exchange
            .complete_open(&caller.peer_id, &request_id, reply)?;
        Ok(json!({ "delivered": delivered }))
    }
}

/// Host answer to `agentThreads.synchronizeRequested`.
pub struct RespondSynchronizeHandler;

#[async_trait]
impl MethodHandler for RespondSynchronizeHandler {
    #[instrument(skip_all, fields(method = "agentThreads.respondSynchronize", peer_id = %caller.peer_id))]
    async fn handle(
        &self,
        params: Option<Value>,
        caller: &PeerIdentity,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError> {
        let request_id: RequestId = require_id(params.as_ref(), "requestId")?;
        let reply = match host_error(params.as_ref())? {
            Some(message) => Err(message),
            None => {
                Ok(parse_param::<Vec<ThreadRevision>>(params.as_ref(), "sessions")?)
            }
        };
        let delivered = ctx
            .exchange
            .complete_synchronize(&caller.peer_id, &request_id, reply)?;
        Ok(json!({ "delivered": delivered }))
    }
}
