//! Presence store and broadcaster.
//!
//! Each room owns its own mutex; every publish and cleanup for the room runs
//! under it, including the fan-out, so generations reach every recipient's
//! queue in increasing order. Unrelated rooms never contend.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use huddle_core::limits::validate_sessions;
use huddle_core::{
    AgentSession, CollabError, PeerId, PresenceSnapshot, PresenceUpdate, ProjectId, RoomId, UserId,
};
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::membership::{MembershipOracle, PeerIdentity};
use crate::metrics::{PRESENCE_CLEANUPS_TOTAL, PRESENCE_PUBLISHES_TOTAL, PRESENCE_REJECTIONS_TOTAL};
use crate::rate_limit::PublishLimiter;
use crate::rpc::types::{PRESENCE_UPDATED, RpcEvent};
use crate::websocket::broadcast::BroadcastManager;

#[derive(Debug)]
struct PresenceEntry {
    user_id: UserId,
    snapshot: PresenceSnapshot,
}

#[derive(Debug, Default)]
struct RoomPresence {
    entries: HashMap<PeerId, PresenceEntry>,
}

/// Ephemeral `(room, peer) → snapshot` store with room fan-out.
pub struct PresenceService {
    rooms: DashMap<RoomId, Arc<Mutex<RoomPresence>>>,
    oracle: Arc<dyn MembershipOracle>,
    peers: Arc<BroadcastManager>,
    limiter: Arc<PublishLimiter>,
}

impl PresenceService {
    /// Create an empty store.
    pub fn new(
        oracle: Arc<dyn MembershipOracle>,
        peers: Arc<BroadcastManager>,
        limiter: Arc<PublishLimiter>,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            oracle,
            peers,
            limiter,
        }
    }

    /// Replace `publisher`'s session set in `room` and broadcast it.
    ///
    /// Checks run in order: room membership, the whole batch against the
    /// boundary limits and the publisher's shared projects, then the publish
    /// quota. A rejected batch never spends a token. Any failure leaves the
    /// stored snapshot untouched and sends nothing. Returns the new
    /// generation.
    #[instrument(skip_all, fields(room_id = %room_id, peer_id = %publisher.peer_id, sessions = sessions.len()))]
    pub fn publish(
        &self,
        room_id: &RoomId,
        publisher: &PeerIdentity,
        sessions: Vec<AgentSession>,
    ) -> Result<u64, CollabError> {
        let room = Arc::clone(self.rooms.entry(room_id.clone()).or_default().value());
        let result = {
            let mut guard = room.lock();
            self.publish_locked(&mut guard, room_id, publisher, sessions)
        };
        drop(room);

        match &result {
            Ok(generation) => {
                counter!(PRESENCE_PUBLISHES_TOTAL).increment(1);
                debug!(generation, "presence published");
            }
            Err(err) => {
                counter!(PRESENCE_REJECTIONS_TOTAL, "reason" => err.reason()).increment(1);
                debug!(error = %err, "presence publish rejected");
                self.prune(room_id);
            }
        }
        result
    }

    fn publish_locked(
        &self,
        room: &mut RoomPresence,
        room_id: &RoomId,
        publisher: &PeerIdentity,
        sessions: Vec<AgentSession>,
    ) -> Result<u64, CollabError> {
        if !self.oracle.is_active_in_room(&publisher.peer_id, room_id) {
            return Err(CollabError::Forbidden);
        }
        let shared = self.oracle.shared_projects(&publisher.peer_id, room_id);
        validate_sessions(&sessions, &shared)?;
        self.limiter.try_acquire(&publisher.peer_id)?;

        let entry = room
            .entries
            .entry(publisher.peer_id.clone())
            .or_insert_with(|| PresenceEntry {
                user_id: publisher.user_id.clone(),
                snapshot: PresenceSnapshot::default(),
            });
        entry.snapshot.generation += 1;
        entry.snapshot.sessions = sessions;

        let generation = entry.snapshot.generation;
        let update = to_update(room_id, &publisher.peer_id, entry);
        self.fan_out(room_id, &publisher.peer_id, &update);
        Ok(generation)
    }

    /// Clear a participant's sessions after it left `room`.
    ///
    /// Bumps the generation and broadcasts the empty set. The entry itself is
    /// kept so a later rejoin on the same connection keeps counting upwards.
    /// Returns `None` if the participant never published in the room.
    pub fn clear_participant(&self, room_id: &RoomId, peer_id: &PeerId) -> Option<u64> {
        let room = self.room(room_id)?;
        let mut guard = room.lock();
        let entry = guard.entries.get_mut(peer_id)?;
        entry.snapshot.sessions.clear();
        entry.snapshot.generation += 1;

        let generation = entry.snapshot.generation;
        let update = to_update(room_id, peer_id, entry);
        self.fan_out(room_id, peer_id, &update);
        counter!(PRESENCE_CLEANUPS_TOTAL, "trigger" => "leave").increment(1);
        debug!(room_id = %room_id, peer_id = %peer_id, generation, "presence cleared");
        Some(generation)
    }

    /// Drop every session referencing `project_id` from the host's set.
    ///
    /// Rebroadcasts only if something was removed; returns the new
    /// generation in that case.
    pub fn trim_project(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        project_id: &ProjectId,
    ) -> Option<u64> {
        let room = self.room(room_id)?;
        let mut guard = room.lock();
        let entry = guard.entries.get_mut(peer_id)?;

        let before = entry.snapshot.sessions.len();
        entry
            .snapshot
            .sessions
            .retain(|s| s.project_id.as_ref() != Some(project_id));
        if entry.snapshot.sessions.len() == before {
            return None;
        }
        entry.snapshot.generation += 1;

        let generation = entry.snapshot.generation;
        let update = to_update(room_id, peer_id, entry);
        self.fan_out(room_id, peer_id, &update);
        counter!(PRESENCE_CLEANUPS_TOTAL, "trigger" => "unshare").increment(1);
        debug!(room_id = %room_id, peer_id = %peer_id, project_id = %project_id, generation, "presence trimmed");
        Some(generation)
    }

    /// Forget a closed connection.
    ///
    /// Broadcasts the cleared set to the room it was in, then drops its
    /// entries everywhere.
    pub fn forget_peer(&self, peer_id: &PeerId, current_room: Option<&RoomId>) {
        if let Some(room_id) = current_room {
            let _ = self.clear_participant(room_id, peer_id);
        }

        let rooms: Vec<(RoomId, Arc<Mutex<RoomPresence>>)> = self
            .rooms
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        for (room_id, room) in rooms {
            let removed = room.lock().entries.remove(peer_id).is_some();
            drop(room);
            if removed {
                self.prune(&room_id);
            }
        }
    }

    /// Every non-empty snapshot in `room` except `exclude`'s, for replay to
    /// a late joiner.
    pub fn room_snapshots(&self, room_id: &RoomId, exclude: &PeerId) -> Vec<PresenceUpdate> {
        let Some(room) = self.room(room_id) else {
            return Vec::new();
        };
        let guard = room.lock();
        guard
            .entries
            .iter()
            .filter(|(peer_id, entry)| *peer_id != exclude && !entry.snapshot.is_empty())
            .map(|(peer_id, entry)| to_update(room_id, peer_id, entry))
            .collect()
    }

    /// The stored snapshot for one participant.
    pub fn snapshot(&self, room_id: &RoomId, peer_id: &PeerId) -> Option<PresenceSnapshot> {
        let room = self.room(room_id)?;
        let guard = room.lock();
        guard.entries.get(peer_id).map(|e| e.snapshot.clone())
    }

    /// Rooms holding presence state.
    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    fn room(&self, room_id: &RoomId) -> Option<Arc<Mutex<RoomPresence>>> {
        self.rooms.get(room_id).map(|r| Arc::clone(r.value()))
    }

    fn prune(&self, room_id: &RoomId) {
        let _ = self.rooms.remove_if(room_id, |_, room| {
            Arc::strong_count(room) == 1 && room.lock().entries.is_empty()
        });
    }

    /// Called with the room lock held.
    fn fan_out(&self, room_id: &RoomId, publisher: &PeerId, update: &PresenceUpdate) {
        let recipients: Vec<PeerId> = self
            .oracle
            .room_participants(room_id)
            .into_iter()
            .filter(|p| p != publisher)
            .collect();
        if recipients.is_empty() {
            return;
        }
        let event = RpcEvent::from_payload(PRESENCE_UPDATED, update);
        let delivered = self.peers.send_to_many(&recipients, &event);
        if delivered < recipients.len() {
            warn!(
                room_id = %room_id,
                peer_id = %publisher,
                recipients = recipients.len(),
                delivered,
                "presence update not delivered to every participant"
            );
        }
    }
}

fn to_update(room_id: &RoomId, peer_id: &PeerId, entry: &PresenceEntry) -> PresenceUpdate {
    PresenceUpdate {
        room_id: room_id.clone(),
        peer_id: peer_id.clone(),
        user_id: entry.user_id.clone(),
        sessions: entry.snapshot.sessions.clone(),
        generation: entry.snapshot.generation,
    }
}
