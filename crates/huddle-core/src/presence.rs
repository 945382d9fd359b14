//! Agent presence types.
//!
//! A participant publishes the full set of its [`AgentSession`]s; the server
//! stores it as a [`PresenceSnapshot`] tagged with a generation that only
//! ever grows for a given `(room, peer)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentSessionId, PeerId, ProjectId, RoomId, UserId};

/// What a background agent is doing right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    /// Not doing anything. Older clients report finished work as `done`.
    #[default]
    #[serde(alias = "done")]
    Idle,
    /// Reading files.
    Reading,
    /// Editing files.
    Editing,
    /// Generating a response.
    Generating,
    /// Blocked on a tool authorization prompt.
    WaitingForApproval,
    /// The last turn failed.
    Error,
}

/// One unit of background agent work, as shown to collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    /// Globally unique session id.
    pub id: AgentSessionId,
    /// Human-readable title (bounded, see [`crate::limits::MAX_TITLE_BYTES`]).
    pub title: String,
    /// Current status.
    #[serde(default)]
    pub status: AgentStatus,
    /// Project the session works in, if any. Must be shared by the publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    /// Project-relative path of the file being worked on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    /// When the publisher last saw this session change; stamped on
    /// arrival when omitted.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    /// Build a session with the given id and title, idle, stamped now.
    pub fn new(id: impl Into<AgentSessionId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: AgentStatus::Idle,
            project_id: None,
            relative_path: None,
            updated_at: Utc::now(),
        }
    }

    /// Attach a project.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<ProjectId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Attach a project-relative file path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = Some(path.into());
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }
}

/// A participant's full session set at one generation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Every active session; empty means "no agent work".
    pub sessions: Vec<AgentSession>,
    /// Strictly increasing per `(room, peer)` for the life of the connection.
    pub generation: u64,
}

impl PresenceSnapshot {
    /// Whether the participant currently reports no agent work.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Payload of an `agentPresence.updated` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    /// Room the publisher is in.
    pub room_id: RoomId,
    /// Publisher connection.
    pub peer_id: PeerId,
    /// Publisher user.
    pub user_id: UserId,
    /// The publisher's full session set.
    pub sessions: Vec<AgentSession>,
    /// Generation of this set.
    pub generation: u64,
}
