//! Guest → host snapshot relay.
//!
//! Every forwarded request gets its own correlation id, its own pending
//! entry and its own timer, so a stuck host only ever stalls the requests
//! addressed to it. Snapshot bytes are relayed and never stored.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use huddle_core::limits::{MAX_TITLE_BYTES, check_snapshot_size, validate_len};
use huddle_core::{
    AgentSessionId, CollabError, PeerId, ProjectId, RequestId, ThreadRevision, ThreadSnapshot,
};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::membership::{MembershipOracle, PeerIdentity};
use crate::metrics::{
    RELAY_DURATION_SECONDS, RELAY_FAILURES_TOTAL, RELAY_PENDING, RELAY_REQUESTS_TOTAL,
};
use crate::rpc::types::{RpcEvent, THREAD_OPEN_REQUESTED, THREADS_SYNCHRONIZE_REQUESTED};
use crate::websocket::broadcast::BroadcastManager;

/// A host's answer to an open request.
#[derive(Clone, Debug)]
pub struct OpenReply {
    /// Thread title.
    pub title: String,
    /// Serialized thread content.
    pub snapshot: Vec<u8>,
    /// Revision the bytes represent.
    pub revision: u64,
}

type OpenSender = oneshot::Sender<Result<ThreadSnapshot, CollabError>>;
type SyncSender = oneshot::Sender<Result<Vec<ThreadRevision>, CollabError>>;

enum PendingKind {
    Open {
        session_id: AgentSessionId,
        reply: OpenSender,
    },
    Synchronize {
        listed: HashSet<AgentSessionId>,
        reply: SyncSender,
    },
}

impl PendingKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Synchronize { .. } => "synchronize",
        }
    }

    fn fail(self, err: CollabError) {
        // The guest may have given up already.
        match self {
            Self::Open { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Synchronize { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

struct PendingRequest {
    project_id: ProjectId,
    host: PeerIdentity,
    guest: PeerId,
    kind: PendingKind,
}

/// Removes the pending entry however the waiting future ends.
struct PendingGuard<'a> {
    pending: &'a DashMap<RequestId, PendingRequest>,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let _ = self.pending.remove(&self.request_id);
        gauge!(RELAY_PENDING).decrement(1.0);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenRequested<'a> {
    request_id: &'a RequestId,
    project_id: &'a ProjectId,
    session_id: &'a AgentSessionId,
    guest_peer_id: &'a PeerId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynchronizeRequested<'a> {
    request_id: &'a RequestId,
    project_id: &'a ProjectId,
    guest_peer_id: &'a PeerId,
    sessions: &'a [ThreadRevision],
}

/// Correlates guest requests with host replies.
pub struct SnapshotExchange {
    pending: DashMap<RequestId, PendingRequest>,
    oracle: Arc<dyn MembershipOracle>,
    peers: Arc<BroadcastManager>,
    timeout: Duration,
}

impl SnapshotExchange {
    /// Create a relay whose requests give up after `timeout`.
    pub fn new(
        oracle: Arc<dyn MembershipOracle>,
        peers: Arc<BroadcastManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            pending: DashMap::new(),
            oracle,
            peers,
            timeout,
        }
    }

    /// Ask the project host for one thread's snapshot.
    ///
    /// The guest must have joined the project; otherwise the host is never
    /// contacted.
    #[instrument(skip_all, fields(project_id = %project_id, session_id = %session_id, peer_id = %guest.peer_id))]
    pub async fn open_thread(
        &self,
        guest: &PeerIdentity,
        project_id: &ProjectId,
        session_id: &AgentSessionId,
    ) -> Result<ThreadSnapshot, CollabError> {
        let (tx, rx) = oneshot::channel();
        let kind = PendingKind::Open {
            session_id: session_id.clone(),
            reply: tx,
        };
        self.relay(guest, project_id, kind, rx, |request_id, guest_peer_id| {
            RpcEvent::from_payload(
                THREAD_OPEN_REQUESTED,
                &OpenRequested {
                    request_id,
                    project_id,
                    session_id,
                    guest_peer_id,
                },
            )
        })
        .await
    }

    /// Ask the project host for authoritative revisions of the listed
    /// sessions. The reply is restricted to sessions the guest asked about.
    #[instrument(skip_all, fields(project_id = %project_id, sessions = sessions.len(), peer_id = %guest.peer_id))]
    pub async fn synchronize(
        &self,
        guest: &PeerIdentity,
        project_id: &ProjectId,
        sessions: &[ThreadRevision],
    ) -> Result<Vec<ThreadRevision>, CollabError> {
        let (tx, rx) = oneshot::channel();
        let kind = PendingKind::Synchronize {
            listed: sessions.iter().map(|s| s.session_id.clone()).collect(),
            reply: tx,
        };
        self.relay(guest, project_id, kind, rx, |request_id, guest_peer_id| {
            RpcEvent::from_payload(
                THREADS_SYNCHRONIZE_REQUESTED,
                &SynchronizeRequested {
                    request_id,
                    project_id,
                    guest_peer_id,
                    sessions,
                },
            )
        })
        .await
    }

    async fn relay<T>(
        &self,
        guest: &PeerIdentity,
        project_id: &ProjectId,
        kind: PendingKind,
        rx: oneshot::Receiver<Result<T, CollabError>>,
        make_event: impl FnOnce(&RequestId, &PeerId) -> RpcEvent,
    ) -> Result<T, CollabError> {
        let label = kind.label();
        counter!(RELAY_REQUESTS_TOTAL, "kind" => label).increment(1);
        let start = Instant::now();

        let result = self.forward(guest, project_id, kind, rx, make_event).await;

        histogram!(RELAY_DURATION_SECONDS, "kind" => label).record(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            counter!(RELAY_FAILURES_TOTAL, "kind" => label, "reason" => err.reason()).increment(1);
            debug!(error = %err, "relay failed");
        }
        result
    }

    async fn forward<T>(
        &self,
        guest: &PeerIdentity,
        project_id: &ProjectId,
        kind: PendingKind,
        rx: oneshot::Receiver<Result<T, CollabError>>,
        make_event: impl FnOnce(&RequestId, &PeerId) -> RpcEvent,
    ) -> Result<T, CollabError> {
        if !self.oracle.is_project_guest(&guest.peer_id, project_id) {
            return Err(CollabError::Forbidden);
        }
        let host = self
            .oracle
            .project_host(project_id)
            .ok_or(CollabError::HostUnavailable)?;
        if !self.peers.is_connected(&host.peer.peer_id) {
            return Err(CollabError::HostUnavailable);
        }

        let request_id = RequestId::new();
        let event = make_event(&request_id, &guest.peer_id);
        let host_peer = host.peer.peer_id.clone();
        let _ = self.pending.insert(
            request_id.clone(),
            PendingRequest {
                project_id: project_id.clone(),
                host: host.peer,
                guest: guest.peer_id.clone(),
                kind,
            },
        );
        gauge!(RELAY_PENDING).increment(1.0);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: request_id.clone(),
        };

        if !self.peers.send_to(&host_peer, &event) {
            return Err(CollabError::HostUnavailable);
        }
        debug!(request_id = %request_id, host = %host_peer, "request forwarded to host");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_closed)) => Err(CollabError::HostUnavailable),
            Err(_elapsed) => {
                warn!(request_id = %request_id, host = %host_peer, "host did not answer in time");
                Err(CollabError::Timeout)
            }
        }
    }

    /// Deliver a host's answer to an open request.
    ///
    /// `Ok(false)` means the request is unknown or already finished; the
    /// reply is dropped. A reply from anyone but the addressed host is
    /// `Forbidden`. An oversized or malformed reply fails both sides.
    pub fn complete_open(
        &self,
        responder: &PeerId,
        request_id: &RequestId,
        reply: Result<OpenReply, String>,
    ) -> Result<bool, CollabError> {
        let Some(pending) = self.take(responder, request_id, "open")? else {
            return Ok(false);
        };
        let PendingKind::Open {
            session_id,
            reply: tx,
        } = pending.kind
        else {
            return Ok(false);
        };

        let (outcome, host_result) = match reply {
            Ok(open) => match check_open_reply(&open) {
                Ok(()) => (
                    Ok(ThreadSnapshot {
                        session_id,
                        title: open.title,
                        snapshot: open.snapshot,
                        revision: open.revision,
                        host_peer_id: pending.host.peer_id,
                        host_user_id: pending.host.user_id,
                    }),
                    Ok(true),
                ),
                Err(err) => (Err(err.clone()), Err(err)),
            },
            Err(message) => (Err(CollabError::NotFound { message }), Ok(true)),
        };

        let _ = tx.send(outcome);
        debug!(request_id = %request_id, guest = %pending.guest, "open reply relayed");
        host_result
    }

    /// Deliver a host's answer to a synchronize request.
    pub fn complete_synchronize(
        &self,
        responder: &PeerId,
        request_id: &RequestId,
        reply: Result<Vec<ThreadRevision>, String>,
    ) -> Result<bool, CollabError> {
        let Some(pending) = self.take(responder, request_id, "synchronize")? else {
            return Ok(false);
        };
        let PendingKind::Synchronize { listed, reply: tx } = pending.kind else {
            return Ok(false);
        };

        let outcome = match reply {
            Ok(mut revisions) => {
                revisions.retain(|r| listed.contains(&r.session_id));
                Ok(revisions)
            }
            Err(message) => Err(CollabError::NotFound { message }),
        };
        let _ = tx.send(outcome);
        debug!(request_id = %request_id, guest = %pending.guest, "synchronize reply relayed");
        Ok(true)
    }

    fn take(
        &self,
        responder: &PeerId,
        request_id: &RequestId,
        expected: &str,
    ) -> Result<Option<PendingRequest>, CollabError> {
        match self.pending.get(request_id) {
            None => return Ok(None),
            Some(p) if p.host.peer_id != *responder => return Err(CollabError::Forbidden),
            Some(p) if p.kind.label() != expected => {
                return Err(CollabError::validation(format!(
                    "request '{request_id}' is a {} request",
                    p.kind.label()
                )));
            }
            Some(_) => {}
        }
        Ok(self.pending.remove(request_id).map(|(_, p)| p))
    }

    /// Fail every pending request for a project that stopped being shared.
    pub fn abandon_project(&self, project_id: &ProjectId) -> usize {
        self.fail_where(|p| p.project_id == *project_id, &CollabError::HostUnavailable)
    }

    /// Fail every pending request addressed to a departed host.
    pub fn abandon_host(&self, host: &PeerId) -> usize {
        self.fail_where(|p| p.host.peer_id == *host, &CollabError::HostUnavailable)
    }

    /// Fail a departed guest's pending requests, for one project or all.
    pub fn abandon_guest(&self, guest: &PeerId, project_id: Option<&ProjectId>) -> usize {
        self.fail_where(
            |p| p.guest == *guest && project_id.is_none_or(|id| p.project_id == *id),
            &CollabError::Forbidden,
        )
    }

    fn fail_where(&self, matches: impl Fn(&PendingRequest) -> bool, err: &CollabError) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| matches(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                pending.kind.fail(err.clone());
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, code = err.code(), "pending relays failed");
        }
        failed
    }

    /// Requests waiting on a host.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn check_open_reply(reply: &OpenReply) -> Result<(), CollabError> {
    check_snapshot_size(reply.snapshot.len())?;
    validate_len(&reply.title, "title", MAX_TITLE_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipRegistry;
    use crate::websocket::connection::ClientConnection;
    use assert_matches::assert_matches;
    use huddle_core::RoomId;
    use huddle_core::limits::MAX_SNAPSHOT_BYTES;
    use tokio::sync::mpsc;

    struct Fixture {
        membership: Arc<MembershipRegistry>,
        peers: Arc<BroadcastManager>,
        exchange: Arc<SnapshotExchange>,
        host: PeerIdentity,
        guest: PeerIdentity,
        host_rx: mpsc::Receiver<Arc<String>>,
    }

    fn connect(
        membership: &MembershipRegistry,
        peers: &BroadcastManager,
        name: &str,
    ) -> (PeerIdentity, mpsc::Receiver<Arc<String>>) {
        let identity = PeerIdentity::new(name, format!("user-{name}"));
        membership.connect(identity.peer_id.clone(), identity.user_id.clone());
        let _ = membership
            .join_room(&identity.peer_id, &RoomId::from("r"))
            .unwrap();
        let (tx, rx) = mpsc::channel(16);
        peers.add(Arc::new(ClientConnection::new(
            identity.peer_id.clone(),
            identity.user_id.clone(),
            tx,
        )));
        (identity, rx)
    }

    fn fixture(timeout: Duration) -> Fixture {
        let membership = Arc::new(MembershipRegistry::new());
        let peers = Arc::new(BroadcastManager::new());
        let (host, host_rx) = connect(&membership, &peers, "host");
        let (guest, _) = connect(&membership, &peers, "guest");
        membership
            .share_project(&host.peer_id, &RoomId::from("r"), &project())
            .unwrap();
        let _ = membership.join_project(&guest.peer_id, &project()).unwrap();

        let exchange = Arc::new(SnapshotExchange::new(
            Arc::clone(&membership) as Arc<dyn MembershipOracle>,
            Arc::clone(&peers),
            timeout,
        ));
        Fixture {
            membership,
            peers,
            exchange,
            host,
            guest,
            host_rx,
        }
    }

    fn project() -> ProjectId {
        ProjectId::from("p")
    }

    async fn next_request(rx: &mut mpsc::Receiver<Arc<String>>) -> serde_json::Value {
        let raw = rx.recv().await.expect("host should receive a request");
        serde_json::from_str(&raw).unwrap()
    }

    fn request_id(event: &serde_json::Value) -> RequestId {
        RequestId::from(event["data"]["requestId"].as_str().unwrap())
    }

    #[tokio::test]
    async fn open_round_trip_stamps_host_identity() {
        let mut f = fixture(Duration::from_secs(10));
        let exchange = Arc::clone(&f.exchange);
        let guest = f.guest.clone();
        let task = tokio::spawn(async move {
            exchange
                .open_thread(&guest, &project(), &AgentSessionId::from("s1"))
                .await
        });

        let event = next_request(&mut f.host_rx).await;
        assert_eq!(event["type"], THREAD_OPEN_REQUESTED);
        assert_eq!(event["data"]["sessionId"], "s1");
        assert_eq!(event["data"]["guestPeerId"], f.guest.peer_id.as_str());

        let delivered = f
            .exchange
            .complete_open(
                &f.host.peer_id,
                &request_id(&event),
                Ok(OpenReply {
                    title: "Fix tests".into(),
                    snapshot: vec![1, 2, 3],
                    revision: 7,
                }),
            )
            .unwrap();
        assert!(delivered);

        let snapshot = task.await.unwrap().unwrap();
        assert_eq!(snapshot.session_id.as_str(), "s1");
        assert_eq!(snapshot.snapshot, vec![1, 2, 3]);
        assert_eq!(snapshot.revision, 7);
        assert_eq!(snapshot.host_peer_id, f.host.peer_id);
        assert_eq!(snapshot.host_user_id, f.host.user_id);
        assert_eq!(f.exchange.pending_count(), 0);
    }

    #[tokio::test]
    async fn non_guest_is_forbidden_before_host_contact() {
        let mut f = fixture(Duration::from_secs(10));
        let (outsider, _rx) = connect(&f.membership, &f.peers, "outsider");

        let result = f
            .exchange
            .open_thread(&outsider, &project(), &AgentSessionId::from("s1"))
            .await;
        assert_matches!(result, Err(CollabError::Forbidden));
        assert!(f.host_rx.try_recv().is_err());
        assert_eq!(f.exchange.pending_count(), 0);
    }

    #[tokio::test]
    async fn disconnected_host_is_unavailable() {
        let f = fixture(Duration::from_secs(10));
        f.peers.remove(&f.host.peer_id);
        let result = f
            .exchange
            .open_thread(&f.guest, &project(), &AgentSessionId::from("s1"))
            .await;
        assert_matches!(result, Err(CollabError::HostUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_host_times_out() {
        let f = fixture(Duration::from_millis(500));
        let result = f
            .exchange
            .open_thread(&f.guest, &project(), &AgentSessionId::from("s1"))
            .await;
        assert_matches!(result, Err(CollabError::Timeout));
        assert_eq!(f.exchange.pending_count(), 0);
    }

    #[tokio::test]
    async fn late_reply_is_ignored() {
        let mut f = fixture(Duration::from_millis(20));
        let result = f
            .exchange
            .open_thread(&f.guest, &project(), &AgentSessionId::from("s1"))
            .await;
        assert_matches!(result, Err(CollabError::Timeout));

        let event = next_request(&mut f.host_rx).await;
        let delivered = f
            .exchange
            .complete_open(&f.host.peer_id, &request_id(&event), Err("gone".into()))
            .unwrap();
        assert!(!delivered);
    }

    #[tokio::test]
    async fn only_addressed_host_may_reply() {
        let mut f = fixture(Duration::from_secs(10));
        let exchange = Arc::clone(&f.exchange);
        let guest = f.guest.clone();
        let task = tokio::spawn(async move {
            exchange
                .open_thread(&guest, &project(), &AgentSessionId::from("s1"))
                .await
        });
        let event = next_request(&mut f.host_rx).await;
        let id = request_id(&event);

        assert_matches!(
            f.exchange.complete_open(&f.guest.peer_id, &id, Err("spoof".into())),
            Err(CollabError::Forbidden)
        );
        assert_matches!(
            f.exchange.complete_synchronize(&f.host.peer_id, &id, Ok(vec![])),
            Err(CollabError::ValidationFailed { .. })
        );
        assert_eq!(f.exchange.pending_count(), 1);

        assert!(
            f.exchange
                .complete_open(&f.host.peer_id, &id, Err("no such thread".into()))
                .unwrap()
        );
        assert_matches!(task.await.unwrap(), Err(CollabError::NotFound { message }) if message == "no such thread");
    }

    #[tokio::test]
    async fn oversized_snapshot_fails_both_sides() {
        let mut f = fixture(Duration::from_secs(10));
        let exchange = Arc::clone(&f.exchange);
        let guest = f.guest.clone();
        let task = tokio::spawn(async move {
            exchange
                .open_thread(&guest, &project(), &AgentSessionId::from("s1"))
                .await
        });
        let event = next_request(&mut f.host_rx).await;

        let host_result = f.exchange.complete_open(
            &f.host.peer_id,
            &request_id(&event),
            Ok(OpenReply {
                title: "big".into(),
                snapshot: vec![0; MAX_SNAPSHOT_BYTES + 1],
                revision: 1,
            }),
        );
        assert_matches!(host_result, Err(CollabError::SizeExceeded { .. }));
        assert_matches!(task.await.unwrap(), Err(CollabError::SizeExceeded { limit, .. }) if limit == MAX_SNAPSHOT_BYTES);
    }

    #[tokio::test]
    async fn synchronize_filters_to_listed_sessions() {
        let mut f = fixture(Duration::from_secs(10));
        let exchange = Arc::clone(&f.exchange);
        let guest = f.guest.clone();
        let task = tokio::spawn(async move {
            exchange
                .synchronize(&guest, &project(), &[ThreadRevision::new("x", 3)])
                .await
        });

        let event = next_request(&mut f.host_rx).await;
        assert_eq!(event["type"], THREADS_SYNCHRONIZE_REQUESTED);
        assert_eq!(event["data"]["sessions"][0]["sessionId"], "x");
        assert_eq!(event["data"]["sessions"][0]["revision"], 3);

        let _ = f
            .exchange
            .complete_synchronize(
                &f.host.peer_id,
                &request_id(&event),
                Ok(vec![ThreadRevision::new("x", 5), ThreadRevision::new("other", 9)]),
            )
            .unwrap();

        let revisions = task.await.unwrap().unwrap();
        assert_eq!(revisions, vec![ThreadRevision::new("x", 5)]);
    }

    #[tokio::test]
    async fn abandon_project_fails_pending_immediately() {
        let mut f = fixture(Duration::from_secs(600));
        let exchange = Arc::clone(&f.exchange);
        let guest = f.guest.clone();
        let task = tokio::spawn(async move {
            exchange
                .open_thread(&guest, &project(), &AgentSessionId::from("s1"))
                .await
        });
        let _ = next_request(&mut f.host_rx).await;

        assert_eq!(f.exchange.abandon_project(&project()), 1);
        assert_matches!(task.await.unwrap(), Err(CollabError::HostUnavailable));
        assert_eq!(f.exchange.pending_count(), 0);
    }

    #[tokio::test]
    async fn abandon_host_only_touches_that_host() {
        let mut f = fixture(Duration::from_secs(600));
        let exchange = Arc::clone(&f.exchange);
        let guest = f.guest.clone();
        let task = tokio::spawn(async move {
            exchange
                .open_thread(&guest, &project(), &AgentSessionId::from("s1"))
                .await
        });
        let _ = next_request(&mut f.host_rx).await;

        assert_eq!(f.exchange.abandon_host(&f.guest.peer_id), 0);
        assert_eq!(f.exchange.abandon_host(&f.host.peer_id), 1);
        assert_matches!(task.await.unwrap(), Err(CollabError::HostUnavailable));
    }

    #[tokio::test]
    async fn abandon_guest_scoped_by_project() {
        let mut f = fixture(Duration::from_secs(600));
        let exchange = Arc::clone(&f.exchange);
        let guest = f.guest.clone();
        let task = tokio::spawn(async move {
            exchange
                .open_thread(&guest, &project(), &AgentSessionId::from("s1"))
                .await
        });
        let _ = next_request(&mut f.host_rx).await;

        assert_eq!(
            f.exchange
                .abandon_guest(&f.guest.peer_id, Some(&ProjectId::from("other"))),
            0
        );
        assert_eq!(f.exchange.abandon_guest(&f.guest.peer_id, None), 1);
        assert_matches!(task.await.unwrap(), Err(CollabError::Forbidden));
    }

    #[tokio::test]
    async fn unknown_request_is_not_delivered() {
        let f = fixture(Duration::from_secs(1));
        let delivered = f
            .exchange
            .complete_synchronize(&f.host.peer_id, &RequestId::from("nope"), Ok(vec![]))
            .unwrap();
        assert!(!delivered);
    }
}
