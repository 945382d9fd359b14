//! Receiver-side presence merge.
//!
//! The transport may reorder or duplicate `agentPresence.updated` events.
//! An update is applied only when its generation is strictly greater than
//! the one already held for that peer, so the mirror converges on each
//! peer's latest published set regardless of delivery order. Nothing is
//! assumed about ordering between different peers.

use std::collections::HashMap;

use huddle_core::{AgentSession, PeerId, PresenceUpdate, RoomId, UserId};
use tracing::trace;

/// Last applied presence for one peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerPresence {
    /// The peer's user.
    pub user_id: UserId,
    /// Generation of `sessions`.
    pub generation: u64,
    /// The peer's full session set (empty when it has no agent work).
    pub sessions: Vec<AgentSession>,
}

/// One collaborator's view of everyone else's agent presence in a room.
#[derive(Debug)]
pub struct PresenceMirror {
    room_id: RoomId,
    peers: HashMap<PeerId, PeerPresence>,
    // Last generation of each forgotten peer; anything at or below it is late.
    forgotten: HashMap<PeerId, u64>,
}

impl PresenceMirror {
    /// Create an empty mirror for `room_id`.
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            peers: HashMap::new(),
            forgotten: HashMap::new(),
        }
    }

    /// Room this mirror tracks.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Apply an update. Returns `true` if it replaced the held state.
    ///
    /// Updates for another room and updates whose generation is not newer
    /// than the held one are discarded. An empty session set is applied like
    /// any other so a later, older delivery cannot resurrect cleared work.
    pub fn apply(&mut self, update: PresenceUpdate) -> bool {
        if update.room_id != self.room_id {
            trace!(room_id = %update.room_id, "presence update for another room");
            return false;
        }
        if let Some(held) = self.peers.get(&update.peer_id) {
            if update.generation <= held.generation {
                trace!(
                    peer_id = %update.peer_id,
                    held = held.generation,
                    incoming = update.generation,
                    "discarding stale presence update"
                );
                return false;
            }
        }
        if let Some(&last) = self.forgotten.get(&update.peer_id) {
            if update.generation <= last {
                trace!(
                    peer_id = %update.peer_id,
                    last,
                    incoming = update.generation,
                    "discarding late update for forgotten peer"
                );
                return false;
            }
            let _ = self.forgotten.remove(&update.peer_id);
        }
        let _ = self.peers.insert(
            update.peer_id,
            PeerPresence {
                user_id: update.user_id,
                generation: update.generation,
                sessions: update.sessions,
            },
        );
        true
    }

    /// Held presence for `peer`.
    pub fn get(&self, peer: &PeerId) -> Option<&PeerPresence> {
        self.peers.get(peer)
    }

    /// Drop a peer that left the room.
    ///
    /// The peer's last generation is kept so a reordered older update that
    /// arrives afterwards is still discarded. A later rejoin under the same
    /// peer id continues the server's counter and is applied normally.
    pub fn forget_peer(&mut self, peer: &PeerId) -> Option<PeerPresence> {
        let held = self.peers.remove(peer)?;
        let last = self.forgotten.entry(peer.clone()).or_default();
        *last = (*last).max(held.generation);
        Some(held)
    }

    /// Every session currently reported by any peer.
    pub fn active_sessions(&self) -> impl Iterator<Item = (&PeerId, &AgentSession)> {
        self.peers
            .iter()
            .flat_map(|(peer, presence)| presence.sessions.iter().map(move |s| (peer, s)))
    }

    /// Peers with at least one active session.
    pub fn busy_peers(&self) -> usize {
        self.peers.values().filter(|p| !p.sessions.is_empty()).count()
    }

    /// Number of peers with held state, including idle ones.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer state is held.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn room() -> RoomId {
        RoomId::from("room-1")
    }

    fn sessions_for(generation: u64) -> Vec<AgentSession> {
        vec![AgentSession::new(format!("s{generation}"), format!("work {generation}"))]
    }

    fn update(peer: &str, generation: u64, sessions: Vec<AgentSession>) -> PresenceUpdate {
        PresenceUpdate {
            room_id: room(),
            peer_id: PeerId::from(peer),
            user_id: UserId::from("ada"),
            sessions,
            generation,
        }
    }

    fn ids(sessions: &[AgentSession]) -> Vec<&str> {
        sessions.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn first_update_applies() {
        let mut mirror = PresenceMirror::new(room());
        assert!(mirror.apply(update("p1", 1, sessions_for(1))));
        assert_eq!(mirror.get(&"p1".into()).unwrap().generation, 1);
    }

    #[test]
    fn newer_generation_replaces() {
        let mut mirror = PresenceMirror::new(room());
        let _ = mirror.apply(update("p1", 1, sessions_for(1)));
        assert!(mirror.apply(update("p1", 2, sessions_for(2))));
        assert_eq!(ids(&mirror.get(&"p1".into()).unwrap().sessions), ["s2"]);
    }

    #[test]
    fn older_generation_discarded() {
        let mut mirror = PresenceMirror::new(room());
        let _ = mirror.apply(update("p1", 5, sessions_for(5)));
        assert!(!mirror.apply(update("p1", 4, sessions_for(4))));
        assert_eq!(ids(&mirror.get(&"p1".into()).unwrap().sessions), ["s5"]);
    }

    #[test]
    fn duplicate_generation_discarded() {
        let mut mirror = PresenceMirror::new(room());
        assert!(mirror.apply(update("p1", 3, sessions_for(3))));
        assert!(!mirror.apply(update("p1", 3, vec![])));
        assert_eq!(mirror.busy_peers(), 1);
    }

    #[test]
    fn cleared_state_blocks_late_older_update() {
        let mut mirror = PresenceMirror::new(room());
        let _ = mirror.apply(update("p1", 2, vec![]));
        assert!(!mirror.apply(update("p1", 1, sessions_for(1))));
        assert!(mirror.get(&"p1".into()).unwrap().sessions.is_empty());
        assert_eq!(mirror.busy_peers(), 0);
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn peers_are_independent() {
        let mut mirror = PresenceMirror::new(room());
        let _ = mirror.apply(update("p1", 10, sessions_for(10)));
        assert!(mirror.apply(update("p2", 1, sessions_for(1))));
        assert_eq!(mirror.active_sessions().count(), 2);
    }

    #[test]
    fn other_room_ignored() {
        let mut mirror = PresenceMirror::new(room());
        let mut foreign = update("p1", 1, sessions_for(1));
        foreign.room_id = RoomId::from("room-2");
        assert!(!mirror.apply(foreign));
        assert!(mirror.is_empty());
    }

    #[test]
    fn late_update_after_forget_is_discarded() {
        let mut mirror = PresenceMirror::new(room());
        let _ = mirror.apply(update("p1", 1, sessions_for(1)));
        let _ = mirror.apply(update("p1", 3, vec![]));
        assert!(mirror.forget_peer(&"p1".into()).is_some());

        assert!(!mirror.apply(update("p1", 2, sessions_for(2))));
        assert!(mirror.get(&"p1".into()).is_none());
        assert_eq!(mirror.busy_peers(), 0);
    }

    #[test]
    fn rejoin_after_forget_continues_counter() {
        let mut mirror = PresenceMirror::new(room());
        let _ = mirror.apply(update("p1", 4, vec![]));
        let _ = mirror.forget_peer(&"p1".into());

        assert!(!mirror.apply(update("p1", 4, sessions_for(4))));
        assert!(mirror.apply(update("p1", 5, sessions_for(5))));
        assert_eq!(ids(&mirror.get(&"p1".into()).unwrap().sessions), ["s5"]);
    }

    #[test]
    fn forget_unknown_peer_is_noop() {
        let mut mirror = PresenceMirror::new(room());
        assert!(mirror.forget_peer(&"p1".into()).is_none());
        assert!(mirror.apply(update("p1", 1, sessions_for(1))));
    }

    proptest! {
        #[test]
        fn any_delivery_order_converges_to_highest_generation(
            order in prop::collection::btree_set(1u64..10_000, 1..24)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>())
                .prop_flat_map(|v| Just(v).prop_shuffle()),
            duplicate in any::<bool>(),
        ) {
            let mut mirror = PresenceMirror::new(room());
            let mut deliveries = order.clone();
            if duplicate {
                deliveries.extend(order.iter().rev().copied());
            }
            for generation in &deliveries {
                let _ = mirror.apply(update("p1", *generation, sessions_for(*generation)));
            }

            let max = *order.iter().max().unwrap();
            let held = mirror.get(&"p1".into()).unwrap();
            prop_assert_eq!(held.generation, max);
            let expected = format!("s{max}");
            prop_assert_eq!(ids(&held.sessions), vec![expected.as_str()]);
        }

        #[test]
        fn two_generations_either_order(g1 in 1u64..1000, delta in 1u64..1000, swap in any::<bool>()) {
            let g2 = g1 + delta;
            let (first, second) = if swap { (g2, g1) } else { (g1, g2) };
            let mut mirror = PresenceMirror::new(room());
            let _ = mirror.apply(update("p1", first, sessions_for(first)));
            let _ = mirror.apply(update("p1", second, sessions_for(second)));
            prop_assert_eq!(mirror.get(&"p1".into()).unwrap().generation, g2);
        }
    }
}
