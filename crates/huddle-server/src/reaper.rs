//! Lifecycle cleanup.
//!
//! Membership changes are applied first; the reaper then tears down the
//! state derived from them. Presence cleanup runs under the room lock, so a
//! publish racing a leave either lands before the clear or is rejected.

use std::sync::Arc;

use huddle_core::{PeerId, ProjectId};
use tracing::{debug, info};

use crate::exchange::SnapshotExchange;
use crate::membership::{DisconnectReport, RoomLeaveReport, UnshareReport};
use crate::metadata::MetadataCache;
use crate::presence::PresenceService;
use crate::rate_limit::PublishLimiter;

/// Clears presence, metadata, and pending relays when membership ends.
pub struct LifecycleReaper {
    presence: Arc<PresenceService>,
    metadata: Arc<MetadataCache>,
    exchange: Arc<SnapshotExchange>,
    limiter: Arc<PublishLimiter>,
}

impl LifecycleReaper {
    /// Wire the reaper to the stores it cleans.
    pub fn new(
        presence: Arc<PresenceService>,
        metadata: Arc<MetadataCache>,
        exchange: Arc<SnapshotExchange>,
        limiter: Arc<PublishLimiter>,
    ) -> Self {
        Self {
            presence,
            metadata,
            exchange,
            limiter,
        }
    }

    /// A host stopped sharing a project.
    ///
    /// Evicts the metadata cache, fails pending relays, and trims the host's
    /// presence of sessions tied to the project.
    pub fn on_project_unshared(&self, report: &UnshareReport) {
        self.drop_project(report);
        let _ = self
            .presence
            .trim_project(&report.room_id, &report.host.peer_id, &report.project_id);
    }

    /// A guest left a project; its pending requests there are dropped.
    pub fn on_project_left(&self, guest: &PeerId, project_id: &ProjectId) {
        let failed = self.exchange.abandon_guest(guest, Some(project_id));
        debug!(peer_id = %guest, project_id = %project_id, failed, "guest left project");
    }

    /// A participant left a room.
    ///
    /// Every hosted project there was unshared with it; the whole presence
    /// set is cleared, so no separate trim is needed.
    pub fn on_room_left(&self, report: &RoomLeaveReport) {
        self.drop_room_projects(report);
        let _ = self
            .presence
            .clear_participant(&report.room_id, &report.peer_id);
    }

    /// A connection closed.
    pub fn on_disconnect(&self, report: &DisconnectReport) {
        if let Some(room) = &report.room {
            self.drop_room_projects(room);
        }
        self.presence
            .forget_peer(&report.peer_id, report.room.as_ref().map(|r| &r.room_id));

        let as_host = self.exchange.abandon_host(&report.peer_id);
        let as_guest = self.exchange.abandon_guest(&report.peer_id, None);
        self.limiter.forget(&report.peer_id);
        info!(
            peer_id = %report.peer_id,
            failed_as_host = as_host,
            failed_as_guest = as_guest,
            "participant state reaped"
        );
    }

    fn drop_room_projects(&self, report: &RoomLeaveReport) {
        for unshared in &report.unshared {
            self.drop_project(unshared);
        }
        for project_id in &report.left_projects {
            self.on_project_left(&report.peer_id, project_id);
        }
    }

    fn drop_project(&self, report: &UnshareReport) {
        self.metadata.evict(&report.project_id);
        let failed = self.exchange.abandon_project(&report.project_id);
        debug!(project_id = %report.project_id, failed, "project reaped");
    }
}
