//! # huddle-server
//!
//! Axum HTTP + `WebSocket` server that shares background-agent activity
//! between collaborators.
//!
//! - **Membership**: read-only [`membership::MembershipOracle`] view over an
//!   in-memory room/project registry
//! - **Presence**: validated, generation-stamped presence snapshots, fanned
//!   out per room under a per-room lock
//! - **Threads**: per-project metadata cache plus a guest → host snapshot
//!   relay with correlation ids and independent timeouts
//! - **Quota**: per-connection token bucket on presence publishes
//! - **Lifecycle**: the reaper clears presence, cache, and pending relays on
//!   leave, unshare, and disconnect
//! - **Transport**: JSON-RPC over `WebSocket`, `/health`, `/metrics`,
//!   heartbeat, and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod exchange;
pub mod health;
pub mod membership;
pub mod metadata;
pub mod metrics;
pub mod presence;
pub mod rate_limit;
pub mod reaper;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod websocket;
