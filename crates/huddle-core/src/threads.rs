//! Agent thread metadata and snapshots.
//!
//! Hosts push lightweight [`ThreadMetadata`] for every thread in a shared
//! project. Guests pull the full [`ThreadSnapshot`] on demand; the server
//! relays snapshot bytes but never stores them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentSessionId, PeerId, ProjectId, UserId};

/// Advertised descriptor of one agent thread in a shared project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMetadata {
    /// Session the thread belongs to.
    pub session_id: AgentSessionId,
    /// Thread title.
    pub title: String,
    /// When the thread content last changed on the host.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Content version; never decreases for a session on a given host.
    pub revision: u64,
}

impl ThreadMetadata {
    /// Build metadata stamped now.
    pub fn new(session_id: impl Into<AgentSessionId>, title: impl Into<String>, revision: u64) -> Self {
        Self {
            session_id: session_id.into(),
            title: title.into(),
            updated_at: Utc::now(),
            revision,
        }
    }

    /// The `(session, revision)` pair this entry advertises.
    pub fn revision_pair(&self) -> ThreadRevision {
        ThreadRevision {
            session_id: self.session_id.clone(),
            revision: self.revision,
        }
    }
}

/// A `(session, revision)` pair exchanged during synchronization.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRevision {
    /// Session id.
    pub session_id: AgentSessionId,
    /// Revision held (guest) or authoritative (host).
    pub revision: u64,
}

impl ThreadRevision {
    /// Build a pair.
    pub fn new(session_id: impl Into<AgentSessionId>, revision: u64) -> Self {
        Self {
            session_id: session_id.into(),
            revision,
        }
    }
}

/// Serialized thread content for one session, as delivered to a guest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSnapshot {
    /// Session id.
    pub session_id: AgentSessionId,
    /// Thread title at the time of the snapshot.
    pub title: String,
    /// Opaque thread content, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub snapshot: Vec<u8>,
    /// Revision the bytes represent.
    pub revision: u64,
    /// Host connection that produced the snapshot.
    pub host_peer_id: PeerId,
    /// Host user that produced the snapshot.
    pub host_user_id: UserId,
}

/// Payload of an `agentThreads.advertised` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadAdvertisement {
    /// Project the threads belong to.
    pub project_id: ProjectId,
    /// Host connection, stamped by the server.
    pub host_peer_id: PeerId,
    /// Host user, stamped by the server.
    pub host_user_id: UserId,
    /// The host's full thread metadata set.
    pub entries: Vec<ThreadMetadata>,
}

/// Serde adapter carrying `Vec<u8>` as a standard base64 string.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as base64.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize bytes from base64.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
