//! # huddle-core
//!
//! Shared vocabulary for the huddle collaboration server and its clients.
//!
//! - **Branded IDs**: `RoomId`, `PeerId`, `UserId`, `ProjectId`,
//!   `AgentSessionId`, `RequestId` as newtypes for type safety
//! - **Presence**: `AgentSession`, `AgentStatus`, `PresenceSnapshot`,
//!   `PresenceUpdate`
//! - **Threads**: `ThreadMetadata`, `ThreadRevision`, `ThreadSnapshot`,
//!   `ThreadAdvertisement`
//! - **Limits**: protocol boundary limits and whole-batch validation
//! - **Errors**: `CollabError` taxonomy with stable wire codes
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod limits;
pub mod logging;
pub mod presence;
pub mod threads;

pub use errors::CollabError;
pub use ids::{AgentSessionId, PeerId, ProjectId, RequestId, RoomId, UserId};
pub use presence::{AgentSession, AgentStatus, PresenceSnapshot, PresenceUpdate};
pub use threads::{ThreadAdvertisement, ThreadMetadata, ThreadRevision, ThreadSnapshot};
