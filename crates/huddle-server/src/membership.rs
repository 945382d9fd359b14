//! Room and project membership.
//!
//! Presence, metadata, and relay code only ever see membership through the
//! read-only [`MembershipOracle`]. The [`MembershipRegistry`] is the
//! in-memory record behind it; its mutators return reports describing what
//! ended so the lifecycle reaper can clean up the derived state.

use std::collections::{HashMap, HashSet};

use huddle_core::{PeerId, ProjectId, RoomId, UserId};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

/// Both identities of one connected participant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    /// Connection-scoped id.
    pub peer_id: PeerId,
    /// Stable user id.
    pub user_id: UserId,
}

impl PeerIdentity {
    /// Pair a peer id with its user id.
    pub fn new(peer_id: impl Into<PeerId>, user_id: impl Into<UserId>) -> Self {
        Self {
            peer_id: peer_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Who hosts a project, and in which room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectHost {
    /// Room the project is shared in.
    pub room_id: RoomId,
    /// The hosting participant.
    pub peer: PeerIdentity,
}

/// Read-only membership queries.
pub trait MembershipOracle: Send + Sync {
    /// Whether `peer` is currently a participant of `room`.
    fn is_active_in_room(&self, peer: &PeerId, room: &RoomId) -> bool;

    /// Projects `peer` currently shares within `room`.
    fn shared_projects(&self, peer: &PeerId, room: &RoomId) -> HashSet<ProjectId>;

    /// Every current participant of `room`.
    fn room_participants(&self, room: &RoomId) -> Vec<PeerId>;

    /// Current host of `project`, if it is shared.
    fn project_host(&self, project: &ProjectId) -> Option<ProjectHost>;

    /// Whether `peer` has joined `project` as a guest.
    fn is_project_guest(&self, peer: &PeerId, project: &ProjectId) -> bool;

    /// Every current guest of `project`.
    fn project_guests(&self, project: &ProjectId) -> Vec<PeerId>;
}

/// Membership mutation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    /// The participant is not in the named room.
    #[error("not a participant of room '{0}'")]
    NotInRoom(RoomId),
    /// Nobody shares the project.
    #[error("project '{0}' is not shared")]
    UnknownProject(ProjectId),
    /// Only the host may do this.
    #[error("not the host of project '{0}'")]
    NotHost(ProjectId),
    /// Only a joined guest may do this.
    #[error("not a guest of project '{0}'")]
    NotGuest(ProjectId),
    /// Someone else already shares the project.
    #[error("project '{0}' is already shared by another participant")]
    AlreadyShared(ProjectId),
    /// The project lives in a room the participant is not in.
    #[error("project '{0}' is shared in a different room")]
    DifferentRoom(ProjectId),
    /// The connection was never registered.
    #[error("unknown peer '{0}'")]
    UnknownPeer(PeerId),
}

/// A project that stopped being shared.
#[derive(Clone, Debug)]
pub struct UnshareReport {
    /// The project.
    pub project_id: ProjectId,
    /// Room it was shared in.
    pub room_id: RoomId,
    /// Its former host.
    pub host: PeerIdentity,
    /// Guests that were joined at the time.
    pub guests: Vec<PeerId>,
}

/// What ended when a participant left a room.
#[derive(Clone, Debug)]
pub struct RoomLeaveReport {
    /// The room that was left.
    pub room_id: RoomId,
    /// The participant.
    pub peer_id: PeerId,
    /// Projects the participant hosted there, now unshared.
    pub unshared: Vec<UnshareReport>,
    /// Projects the participant had joined as a guest there.
    pub left_projects: Vec<ProjectId>,
}

/// What ended when a connection closed.
#[derive(Clone, Debug)]
pub struct DisconnectReport {
    /// The departed participant.
    pub peer_id: PeerId,
    /// Room cleanup, if the participant was in one.
    pub room: Option<RoomLeaveReport>,
}

#[derive(Debug)]
struct Participant {
    user_id: UserId,
    room: Option<RoomId>,
    hosted: HashSet<ProjectId>,
    joined: HashSet<ProjectId>,
}

#[derive(Debug)]
struct Project {
    room_id: RoomId,
    host: PeerIdentity,
    guests: HashSet<PeerId>,
}

#[derive(Debug, Default)]
struct State {
    participants: HashMap<PeerId, Participant>,
    rooms: HashMap<RoomId, HashSet<PeerId>>,
    projects: HashMap<ProjectId, Project>,
}

/// In-memory room/project membership records.
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    state: RwLock<State>,
}

impl MembershipRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly upgraded connection.
    pub fn connect(&self, peer_id: PeerId, user_id: UserId) {
        let _ = self.state.write().participants.insert(
            peer_id,
            Participant {
                user_id,
                room: None,
                hosted: HashSet::new(),
                joined: HashSet::new(),
            },
        );
    }

    /// Both identities of a registered connection.
    pub fn identity(&self, peer_id: &PeerId) -> Option<PeerIdentity> {
        self.state
            .read()
            .participants
            .get(peer_id)
            .map(|p| PeerIdentity::new(peer_id.clone(), p.user_id.clone()))
    }

    /// The room a participant is in.
    pub fn current_room(&self, peer_id: &PeerId) -> Option<RoomId> {
        self.state
            .read()
            .participants
            .get(peer_id)
            .and_then(|p| p.room.clone())
    }

    /// Join `room`, leaving any other room first.
    ///
    /// Returns the report for the room that was left, if any. Joining the
    /// room one is already in is a no-op.
    pub fn join_room(
        &self,
        peer_id: &PeerId,
        room_id: &RoomId,
    ) -> Result<Option<RoomLeaveReport>, MembershipError> {
        let mut state = self.state.write();
        let previous = state
            .participants
            .get(peer_id)
            .ok_or_else(|| MembershipError::UnknownPeer(peer_id.clone()))?
            .room
            .clone();

        let report = match previous {
            Some(prev) if prev == *room_id => return Ok(None),
            Some(prev) => Some(state.leave_room(peer_id, &prev)),
            None => None,
        };

        if let Some(p) = state.participants.get_mut(peer_id) {
            p.room = Some(room_id.clone());
        }
        let _ = state
            .rooms
            .entry(room_id.clone())
            .or_default()
            .insert(peer_id.clone());
        info!(peer_id = %peer_id, room_id = %room_id, "joined room");
        Ok(report)
    }

    /// Leave `room`, unsharing hosted projects and leaving joined ones.
    pub fn leave_room(
        &self,
        peer_id: &PeerId,
        room_id: &RoomId,
    ) -> Result<RoomLeaveReport, MembershipError> {
        let mut state = self.state.write();
        let in_room = state
            .participants
            .get(peer_id)
            .is_some_and(|p| p.room.as_ref() == Some(room_id));
        if !in_room {
            return Err(MembershipError::NotInRoom(room_id.clone()));
        }
        Ok(state.leave_room(peer_id, room_id))
    }

    /// Share `project` in `room` with `peer` as host.
    ///
    /// Re-sharing one's own project in the same room is a no-op.
    pub fn share_project(
        &self,
        peer_id: &PeerId,
        room_id: &RoomId,
        project_id: &ProjectId,
    ) -> Result<(), MembershipError> {
        let mut state = self.state.write();
        let participant = state
            .participants
            .get(peer_id)
            .ok_or_else(|| MembershipError::UnknownPeer(peer_id.clone()))?;
        if participant.room.as_ref() != Some(room_id) {
            return Err(MembershipError::NotInRoom(room_id.clone()));
        }
        let host = PeerIdentity::new(peer_id.clone(), participant.user_id.clone());

        if let Some(existing) = state.projects.get(project_id) {
            if existing.host.peer_id == *peer_id {
                return Ok(());
            }
            return Err(MembershipError::AlreadyShared(project_id.clone()));
        }

        let _ = state.projects.insert(
            project_id.clone(),
            Project {
                room_id: room_id.clone(),
                host,
                guests: HashSet::new(),
            },
        );
        if let Some(p) = state.participants.get_mut(peer_id) {
            let _ = p.hosted.insert(project_id.clone());
        }
        info!(peer_id = %peer_id, room_id = %room_id, project_id = %project_id, "project shared");
        Ok(())
    }

    /// Stop sharing `project`. Host only.
    pub fn unshare_project(
        &self,
        peer_id: &PeerId,
        project_id: &ProjectId,
    ) -> Result<UnshareReport, MembershipError> {
        let mut state = self.state.write();
        let project = state
            .projects
            .get(project_id)
            .ok_or_else(|| MembershipError::UnknownProject(project_id.clone()))?;
        if project.host.peer_id != *peer_id {
            return Err(MembershipError::NotHost(project_id.clone()));
        }
        state
            .unshare(project_id)
            .ok_or_else(|| MembershipError::UnknownProject(project_id.clone()))
    }

    /// Join `project` as a guest. The guest must be in the host's room.
    pub fn join_project(
        &self,
        peer_id: &PeerId,
        project_id: &ProjectId,
    ) -> Result<ProjectHost, MembershipError> {
        let mut state = self.state.write();
        let State {
            participants,
            projects,
            ..
        } = &mut *state;

        let participant = participants
            .get_mut(peer_id)
            .ok_or_else(|| MembershipError::UnknownPeer(peer_id.clone()))?;
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| MembershipError::UnknownProject(project_id.clone()))?;
        if participant.room.as_ref() != Some(&project.room_id) {
            return Err(MembershipError::DifferentRoom(project_id.clone()));
        }

        if project.host.peer_id != *peer_id {
            let _ = project.guests.insert(peer_id.clone());
            let _ = participant.joined.insert(project_id.clone());
            debug!(peer_id = %peer_id, project_id = %project_id, "joined project");
        }
        Ok(ProjectHost {
            room_id: project.room_id.clone(),
            peer: project.host.clone(),
        })
    }

    /// Leave a joined project.
    pub fn leave_project(
        &self,
        peer_id: &PeerId,
        project_id: &ProjectId,
    ) -> Result<(), MembershipError> {
        let mut state = self.state.write();
        let State {
            participants,
            projects,
            ..
        } = &mut *state;

        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| MembershipError::UnknownProject(project_id.clone()))?;
        if !project.guests.remove(peer_id) {
            return Err(MembershipError::NotGuest(project_id.clone()));
        }
        if let Some(p) = participants.get_mut(peer_id) {
            let _ = p.joined.remove(project_id);
        }
        debug!(peer_id = %peer_id, project_id = %project_id, "left project");
        Ok(())
    }

    /// Forget a closed connection entirely.
    pub fn disconnect(&self, peer_id: &PeerId) -> Option<DisconnectReport> {
        let mut state = self.state.write();
        let room = state.participants.get(peer_id)?.room.clone();
        let room = room.map(|room_id| state.leave_room(peer_id, &room_id));
        let _ = state.participants.remove(peer_id);
        Some(DisconnectReport {
            peer_id: peer_id.clone(),
            room,
        })
    }

    /// Rooms with at least one participant.
    pub fn room_count(&self) -> usize {
        self.state.read().rooms.len()
    }

    /// Currently shared projects.
    pub fn project_count(&self) -> usize {
        self.state.read().projects.len()
    }
}

impl State {
    fn unshare(&mut self, project_id: &ProjectId) -> Option<UnshareReport> {
        let project = self.projects.remove(project_id)?;
        if let Some(host) = self.participants.get_mut(&project.host.peer_id) {
            let _ = host.hosted.remove(project_id);
        }
        for guest in &project.guests {
            if let Some(p) = self.participants.get_mut(guest) {
                let _ = p.joined.remove(project_id);
            }
        }
        info!(project_id = %project_id, guests = project.guests.len(), "project unshared");
        Some(UnshareReport {
            project_id: project_id.clone(),
            room_id: project.room_id,
            host: project.host,
            guests: project.guests.into_iter().collect(),
        })
    }

    /// Caller has checked that `peer_id` is in `room_id`.
    fn leave_room(&mut self, peer_id: &PeerId, room_id: &RoomId) -> RoomLeaveReport {
        let (hosted, joined) = match self.participants.get_mut(peer_id) {
            Some(p) => {
                p.room = None;
                (
                    std::mem::take(&mut p.hosted),
                    std::mem::take(&mut p.joined),
                )
            }
            None => (HashSet::new(), HashSet::new()),
        };

        let unshared = hosted
            .iter()
            .filter_map(|project_id| self.unshare(project_id))
            .collect();

        let mut left_projects = Vec::with_capacity(joined.len());
        for project_id in joined {
            if let Some(project) = self.projects.get_mut(&project_id) {
                let _ = project.guests.remove(peer_id);
            }
            left_projects.push(project_id);
        }

        if let Some(members) = self.rooms.get_mut(room_id) {
            let _ = members.remove(peer_id);
            if members.is_empty() {
                let _ = self.rooms.remove(room_id);
            }
        }
        info!(peer_id = %peer_id, room_id = %room_id, "left room");

        RoomLeaveReport {
            room_id: room_id.clone(),
            peer_id: peer_id.clone(),
            unshared,
            left_projects,
        }
    }
}

impl MembershipOracle for MembershipRegistry {
    fn is_active_in_room(&self, peer: &PeerId, room: &RoomId) -> bool {
        self.state
            .read()
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(peer))
    }

    fn shared_projects(&self, peer: &PeerId, room: &RoomId) -> HashSet<ProjectId> {
        let state = self.state.read();
        state
            .participants
            .get(peer)
            .filter(|p| p.room.as_ref() == Some(room))
            .map(|p| p.hosted.clone())
            .unwrap_or_default()
    }

    fn room_participants(&self, room: &RoomId) -> Vec<PeerId> {
        self.state
            .read()
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn project_host(&self, project: &ProjectId) -> Option<ProjectHost> {
        self.state
            .read()
            .projects
            .get(project)
            .map(|p| ProjectHost {
                room_id: p.room_id.clone(),
                peer: p.host.clone(),
            })
    }

    fn is_project_guest(&self, peer: &PeerId, project: &ProjectId) -> bool {
        self.state
            .read()
            .projects
            .get(project)
            .is_some_and(|p| p.guests.contains(peer))
    }

    fn project_guests(&self, project: &ProjectId) -> Vec<PeerId> {
        self.state
            .read()
            .projects
            .get(project)
            .map(|p| p.guests.iter().cloned().collect())
            .unwrap_or_default()
    }
}
