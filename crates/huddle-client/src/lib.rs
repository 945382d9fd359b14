//! # huddle-client
//!
//! Logic a collaborator runs on its side of the huddle protocol:
//!
//! - [`PresenceMirror`]: applies peers' presence broadcasts in generation
//!   order, tolerating reordered or duplicated delivery
//! - [`PublishCoalescer`]: timer-driven buffer that keeps only the latest
//!   local presence and publishes it at most once per window
//! - [`ThreadMirror`]: per-project view of a host's threads, tracking which
//!   snapshots have been requested and delivered and which have gone stale

#![deny(unsafe_code)]

pub mod coalesce;
pub mod merge;
pub mod mirror;

pub use coalesce::PublishCoalescer;
pub use merge::{PeerPresence, PresenceMirror};
pub use mirror::{MirrorError, ThreadMirror, ThreadState, stale_sessions};
