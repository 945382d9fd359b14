//! Guest-side mirror of a host's agent threads in one project.
//!
//! Each session moves through:
//!
//! ```text
//! Unadvertised → Advertised(rev) → SnapshotRequested → SnapshotDelivered(rev)
//!                      │                                     │
//!                      └──────── SynchronizeRequested ◄──────┘
//! ```
//!
//! Responses may arrive after the guest has moved on (left, re-requested,
//! or already received a newer snapshot). Deliveries are therefore guarded by
//! revision: anything not newer than what is held is ignored.

use std::collections::{HashMap, HashSet};

use huddle_core::{AgentSessionId, ProjectId, ThreadMetadata, ThreadRevision, ThreadSnapshot};
use thiserror::Error;
use tracing::debug;

/// Where one session is in the open/synchronize cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// The host has not advertised this session.
    Unadvertised,
    /// Metadata known, no snapshot held.
    Advertised {
        /// Latest advertised revision.
        revision: u64,
    },
    /// An open request is in flight.
    SnapshotRequested {
        /// Revision known when the request was issued.
        revision: u64,
    },
    /// Snapshot bytes are held.
    SnapshotDelivered {
        /// Revision of the held bytes.
        revision: u64,
    },
    /// A synchronize request covering this session is in flight.
    SynchronizeRequested {
        /// Revision the guest reported to the host.
        revision: u64,
    },
}

/// Invalid transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// The host never advertised the session.
    #[error("thread '{0}' has not been advertised")]
    NotAdvertised(AgentSessionId),
    /// A request for the session is already in flight.
    #[error("a request for thread '{0}' is already pending")]
    RequestPending(AgentSessionId),
}

#[derive(Debug, Default)]
struct Entry {
    metadata: Option<ThreadMetadata>,
    snapshot: Option<ThreadSnapshot>,
    in_flight: Option<InFlight>,
}

#[derive(Debug, Clone, Copy)]
enum InFlight {
    Open(u64),
    Synchronize(u64),
}

impl Entry {
    fn state(&self) -> ThreadState {
        match (self.in_flight, &self.snapshot, &self.metadata) {
            (Some(InFlight::Open(revision)), _, _) => ThreadState::SnapshotRequested { revision },
            (Some(InFlight::Synchronize(revision)), _, _) => {
                ThreadState::SynchronizeRequested { revision }
            }
            (None, Some(snap), _) => ThreadState::SnapshotDelivered {
                revision: snap.revision,
            },
            (None, None, Some(meta)) => ThreadState::Advertised {
                revision: meta.revision,
            },
            (None, None, None) => ThreadState::Unadvertised,
        }
    }

    /// Newest revision the guest knows about, held or advertised.
    fn known_revision(&self) -> Option<u64> {
        let held = self.snapshot.as_ref().map(|s| s.revision);
        let advertised = self.metadata.as_ref().map(|m| m.revision);
        held.max(advertised)
    }

    /// Revision of the bytes the guest holds, falling back to the advertised
    /// one when nothing has been delivered yet.
    fn cached_revision(&self) -> Option<u64> {
        self.snapshot
            .as_ref()
            .map(|s| s.revision)
            .or_else(|| self.metadata.as_ref().map(|m| m.revision))
    }
}

/// A guest's view of one shared project's threads.
#[derive(Debug)]
pub struct ThreadMirror {
    project_id: ProjectId,
    entries: HashMap<AgentSessionId, Entry>,
}

impl ThreadMirror {
    /// Empty mirror for `project_id`.
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            entries: HashMap::new(),
        }
    }

    /// Project this mirror tracks.
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Current state of `session`.
    pub fn state(&self, session: &AgentSessionId) -> ThreadState {
        self.entries
            .get(session)
            .map_or(ThreadState::Unadvertised, Entry::state)
    }

    /// Held snapshot for `session`.
    pub fn snapshot(&self, session: &AgentSessionId) -> Option<&ThreadSnapshot> {
        self.entries.get(session).and_then(|e| e.snapshot.as_ref())
    }

    /// Advertised metadata, in no particular order.
    pub fn metadata(&self) -> impl Iterator<Item = &ThreadMetadata> {
        self.entries.values().filter_map(|e| e.metadata.as_ref())
    }

    /// Apply a host advertisement, which replaces the advertised set.
    ///
    /// Sessions missing from the new set are dropped along with any held
    /// snapshot. Returns the sessions whose held snapshot is now older than
    /// the advertised revision.
    pub fn apply_advertisement(&mut self, entries: &[ThreadMetadata]) -> Vec<AgentSessionId> {
        let advertised: HashSet<&AgentSessionId> = entries.iter().map(|e| &e.session_id).collect();
        self.entries.retain(|id, _| advertised.contains(id));

        let mut stale = Vec::new();
        for meta in entries {
            let entry = self.entries.entry(meta.session_id.clone()).or_default();
            if let Some(snap) = &entry.snapshot {
                if meta.revision > snap.revision {
                    stale.push(meta.session_id.clone());
                }
            }
            entry.metadata = Some(meta.clone());
        }
        stale
    }

    /// Mark an open request as issued.
    pub fn begin_open(&mut self, session: &AgentSessionId) -> Result<(), MirrorError> {
        let entry = self
            .entries
            .get_mut(session)
            .ok_or_else(|| MirrorError::NotAdvertised(session.clone()))?;
        if entry.in_flight.is_some() {
            return Err(MirrorError::RequestPending(session.clone()));
        }
        let revision = entry
            .known_revision()
            .ok_or_else(|| MirrorError::NotAdvertised(session.clone()))?;
        entry.in_flight = Some(InFlight::Open(revision));
        Ok(())
    }

    /// Apply a snapshot delivered by the host. Returns `true` if it was kept.
    ///
    /// Deliveries for sessions no longer advertised, or not newer than the
    /// held bytes, are ignored.
    pub fn deliver(&mut self, snapshot: ThreadSnapshot) -> bool {
        let Some(entry) = self.entries.get_mut(&snapshot.session_id) else {
            debug!(session_id = %snapshot.session_id, "ignoring snapshot for unadvertised thread");
            return false;
        };
        if matches!(entry.in_flight, Some(InFlight::Open(_))) {
            entry.in_flight = None;
        }
        if let Some(held) = &entry.snapshot {
            if snapshot.revision <= held.revision {
                debug!(
                    session_id = %snapshot.session_id,
                    held = held.revision,
                    incoming = snapshot.revision,
                    "ignoring stale snapshot"
                );
                return false;
            }
        }
        entry.snapshot = Some(snapshot);
        true
    }

    /// An open request failed; fall back to the previous state.
    pub fn fail_open(&mut self, session: &AgentSessionId) {
        if let Some(entry) = self.entries.get_mut(session) {
            if matches!(entry.in_flight, Some(InFlight::Open(_))) {
                entry.in_flight = None;
            }
        }
    }

    /// Start a synchronize round over every advertised or delivered session
    /// with nothing else in flight. Returns the `(session, revision)` pairs
    /// to send to the host.
    pub fn begin_synchronize(&mut self) -> Vec<ThreadRevision> {
        let mut pairs = Vec::new();
        for (id, entry) in &mut self.entries {
            if entry.in_flight.is_some() {
                continue;
            }
            if let Some(revision) = entry.cached_revision() {
                entry.in_flight = Some(InFlight::Synchronize(revision));
                pairs.push(ThreadRevision::new(id.clone(), revision));
            }
        }
        pairs.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        pairs
    }

    /// Apply the host's authoritative revisions. Returns the sessions that
    /// should be re-opened.
    pub fn complete_synchronize(&mut self, authoritative: &[ThreadRevision]) -> Vec<AgentSessionId> {
        let mut cached = Vec::new();
        for (id, entry) in &mut self.entries {
            if let Some(InFlight::Synchronize(revision)) = entry.in_flight.take() {
                cached.push(ThreadRevision::new(id.clone(), revision));
            }
        }
        let stale = stale_sessions(&cached, authoritative);
        for pair in authoritative {
            if let Some(meta) = self
                .entries
                .get_mut(&pair.session_id)
                .and_then(|e| e.metadata.as_mut())
            {
                meta.revision = meta.revision.max(pair.revision);
            }
        }
        stale
    }

    /// A synchronize request failed; return sessions to their prior state.
    pub fn fail_synchronize(&mut self) {
        for entry in self.entries.values_mut() {
            if matches!(entry.in_flight, Some(InFlight::Synchronize(_))) {
                entry.in_flight = None;
            }
        }
    }
}

/// Sessions whose authoritative revision is newer than the cached one.
///
/// Sessions the host did not return are not stale; sessions the guest did
/// not list are ignored. Output follows `cached` order.
pub fn stale_sessions(cached: &[ThreadRevision], authoritative: &[ThreadRevision]) -> Vec<AgentSessionId> {
    let latest: HashMap<&AgentSessionId, u64> = authoritative
        .iter()
        .map(|pair| (&pair.session_id, pair.revision))
        .collect();
    cached
        .iter()
        .filter(|pair| latest.get(&pair.session_id).is_some_and(|rev| *rev > pair.revision))
        .map(|pair| pair.session_id.clone())
        .collect()
}
