//! Event fan-out to connected peers.
//!
//! The peer table uses a synchronous lock so presence broadcasts can be
//! issued while the room lock is held: every send is a non-blocking
//! `try_send`, so holding both never waits on a slow client.

use std::collections::HashMap;
use std::sync::Arc;

use huddle_core::PeerId;
use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;
use crate::rpc::types::RpcEvent;

/// Connected peers indexed by peer id.
pub struct BroadcastManager {
    connections: RwLock<HashMap<PeerId, Arc<ClientConnection>>>,
}

impl BroadcastManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self
            .connections
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Remove a connection by peer id.
    pub fn remove(&self, peer_id: &PeerId) {
        let _ = self.connections.write().remove(peer_id);
    }

    /// Look up a live connection.
    pub fn get(&self, peer_id: &PeerId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(peer_id).cloned()
    }

    /// Whether `peer_id` has a live connection.
    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.connections.read().contains_key(peer_id)
    }

    /// Send one event to one peer. Returns `false` if the peer is gone or its
    /// queue rejected the frame.
    pub fn send_to(&self, peer_id: &PeerId, event: &RpcEvent) -> bool {
        let Some(json) = serialize(event) else {
            return false;
        };
        let Some(conn) = self.get(peer_id) else {
            debug!(peer_id = %peer_id, event_type = event.event_type, "event target not connected");
            return false;
        };
        deliver(&conn, json, &event.event_type)
    }

    /// Send one event to every listed peer, serializing once.
    ///
    /// Returns how many peers accepted the frame.
    pub fn send_to_many<'a>(
        &self,
        peers: impl IntoIterator<Item = &'a PeerId>,
        event: &RpcEvent,
    ) -> usize {
        let Some(json) = serialize(event) else {
            return 0;
        };
        let conns = self.connections.read();
        let mut delivered = 0;
        for peer_id in peers {
            if let Some(conn) = conns.get(peer_id) {
                if deliver(conn, json.clone(), &event.event_type) {
                    delivered += 1;
                }
            }
        }
        debug!(event_type = event.event_type, delivered, "fan-out event");
        delivered
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(event: &RpcEvent) -> Option<Arc<String>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(event_type = event.event_type, error = %e, "failed to serialize event");
            None
        }
    }
}

fn deliver(conn: &ClientConnection, json: Arc<String>, event_type: &str) -> bool {
    if conn.send(json) {
        return true;
    }
    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
    warn!(peer_id = %conn.id, event_type, "dropped event for slow or closed client");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::UserId;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn make_connection(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(PeerId::from(id), UserId::from("u"), tx);
        (Arc::new(conn), rx)
    }

    #[test]
    fn add_and_remove() {
        let bm = BroadcastManager::new();
        let (conn, _rx) = make_connection("c1");
        bm.add(conn);
        assert_eq!(bm.connection_count(), 1);
        assert!(bm.is_connected(&PeerId::from("c1")));

        bm.remove(&PeerId::from("c1"));
        assert_eq!(bm.connection_count(), 0);
        assert!(bm.get(&PeerId::from("c1")).is_none());
    }

    #[test]
    fn remove_nonexistent_is_noop() {
        let bm = BroadcastManager::default();
        bm.remove(&PeerId::from("ghost"));
        assert_eq!(bm.connection_count(), 0);
    }

    #[test]
    fn send_to_single_peer() {
        let bm = BroadcastManager::new();
        let (c1, mut rx1) = make_connection("c1");
        let (c2, mut rx2) = make_connection("c2");
        bm.add(c1);
        bm.add(c2);

        let event = RpcEvent::new("agentPresence.updated", json!({"generation": 1}));
        assert!(bm.send_to(&PeerId::from("c1"), &event));

        let msg = rx1.try_recv().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "agentPresence.updated");
        assert_eq!(parsed["data"]["generation"], 1);
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn send_to_absent_peer_returns_false() {
        let bm = BroadcastManager::new();
        let event = RpcEvent::new("x", json!({}));
        assert!(!bm.send_to(&PeerId::from("nobody"), &event));
    }

    #[test]
    fn send_to_many_skips_unknown_peers() {
        let bm = BroadcastManager::new();
        let (c1, mut rx1) = make_connection("c1");
        let (c2, mut rx2) = make_connection("c2");
        let (c3, mut rx3) = make_connection("c3");
        bm.add(c1);
        bm.add(c2);
        bm.add(c3);

        let targets = [PeerId::from("c1"), PeerId::from("c3"), PeerId::from("gone")];
        let event = RpcEvent::new("agentThreads.advertised", json!({}));
        assert_eq!(bm.send_to_many(&targets, &event), 2);

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_ok());
    }

    #[test]
    fn full_queue_counts_as_drop() {
        let bm = BroadcastManager::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(ClientConnection::new(PeerId::from("slow"), UserId::from("u"), tx));
        bm.add(Arc::clone(&conn));

        let event = RpcEvent::new("x", json!({}));
        assert!(bm.send_to(&conn.id, &event));
        assert!(!bm.send_to(&conn.id, &event));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn add_overwrites_same_peer() {
        let bm = BroadcastManager::new();
        let (c1, _rx1) = make_connection("same");
        let (c2, _rx2) = make_connection("same");
        bm.add(c1);
        bm.add(c2);
        assert_eq!(bm.connection_count(), 1);
    }
}
