//! Per-project cache of the host's last advertised thread metadata.
//!
//! The cache, not the relay, is the source of truth for "last known"
//! metadata: guests joining late are served from it immediately.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use huddle_core::limits::validate_thread_entries;
use huddle_core::{
    AgentSessionId, CollabError, PeerId, ProjectId, ThreadAdvertisement, ThreadMetadata,
};
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::membership::{MembershipOracle, PeerIdentity};
use crate::metrics::THREAD_ADVERTISEMENTS_TOTAL;
use crate::rpc::types::{RpcEvent, THREADS_ADVERTISED};
use crate::websocket::broadcast::BroadcastManager;

#[derive(Debug, Default)]
struct ProjectThreads {
    advertisement: Option<ThreadAdvertisement>,
    /// Highest revision ever advertised per session. Outlives sessions that
    /// drop out of an advertisement and is only cleared by eviction.
    revisions: HashMap<AgentSessionId, u64>,
}

/// Thread metadata cache with guest fan-out.
pub struct MetadataCache {
    projects: DashMap<ProjectId, Arc<Mutex<ProjectThreads>>>,
    oracle: Arc<dyn MembershipOracle>,
    peers: Arc<BroadcastManager>,
}

impl MetadataCache {
    /// Create an empty cache.
    pub fn new(oracle: Arc<dyn MembershipOracle>, peers: Arc<BroadcastManager>) -> Self {
        Self {
            projects: DashMap::new(),
            oracle,
            peers,
        }
    }

    /// Replace the cached set for `project_id` and relay it to every guest.
    ///
    /// Only the current host may advertise. The host identity on the relayed
    /// advertisement comes from the membership records. Returns the number
    /// of entries stored.
    #[instrument(skip_all, fields(project_id = %project_id, peer_id = %caller.peer_id, entries = entries.len()))]
    pub fn advertise(
        &self,
        caller: &PeerIdentity,
        project_id: &ProjectId,
        entries: Vec<ThreadMetadata>,
    ) -> Result<usize, CollabError> {
        let project = Arc::clone(self.projects.entry(project_id.clone()).or_default().value());
        let result = {
            let mut guard = project.lock();
            self.advertise_locked(&mut guard, caller, project_id, entries)
        };
        drop(project);

        if result.is_err() {
            let _ = self.projects.remove_if(project_id, |_, p| {
                Arc::strong_count(p) == 1 && p.lock().advertisement.is_none()
            });
        }
        result
    }

    fn advertise_locked(
        &self,
        threads: &mut ProjectThreads,
        caller: &PeerIdentity,
        project_id: &ProjectId,
        entries: Vec<ThreadMetadata>,
    ) -> Result<usize, CollabError> {
        let host = self
            .oracle
            .project_host(project_id)
            .filter(|h| h.peer.peer_id == caller.peer_id)
            .ok_or(CollabError::Forbidden)?;

        validate_thread_entries(&entries, |e| threads.revisions.get(&e.session_id).copied())?;
        for entry in &entries {
            let seen = threads.revisions.entry(entry.session_id.clone()).or_default();
            *seen = (*seen).max(entry.revision);
        }

        let count = entries.len();
        let advertisement = ThreadAdvertisement {
            project_id: project_id.clone(),
            host_peer_id: host.peer.peer_id,
            host_user_id: host.peer.user_id,
            entries,
        };

        let guests = self.oracle.project_guests(project_id);
        let event = RpcEvent::from_payload(THREADS_ADVERTISED, &advertisement);
        let delivered = self.peers.send_to_many(&guests, &event);
        threads.advertisement = Some(advertisement);

        counter!(THREAD_ADVERTISEMENTS_TOTAL).increment(1);
        debug!(guests = guests.len(), delivered, "thread metadata advertised");
        Ok(count)
    }

    /// Send the cached set to a newly joined guest.
    ///
    /// Returns `false` if nothing is cached yet.
    pub fn serve_cached(&self, project_id: &ProjectId, guest: &PeerId) -> bool {
        let Some(project) = self.projects.get(project_id).map(|p| Arc::clone(p.value())) else {
            return false;
        };
        let guard = project.lock();
        let Some(advertisement) = guard.advertisement.as_ref() else {
            return false;
        };
        let event = RpcEvent::from_payload(THREADS_ADVERTISED, advertisement);
        self.peers.send_to(guest, &event)
    }

    /// The cached entries for a project.
    pub fn cached(&self, project_id: &ProjectId) -> Option<Vec<ThreadMetadata>> {
        let project = self.projects.get(project_id).map(|p| Arc::clone(p.value()))?;
        let guard = project.lock();
        guard.advertisement.as_ref().map(|a| a.entries.clone())
    }

    /// Drop a project's cache after it was unshared.
    ///
    /// This also forgets revision history, so a re-shared project starts
    /// from a clean slate.
    pub fn evict(&self, project_id: &ProjectId) {
        if self.projects.remove(project_id).is_some() {
            debug!(project_id = %project_id, "thread metadata evicted");
        }
    }

    /// Projects with cached metadata.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
