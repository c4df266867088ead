//! Live fan-out of request outcomes to every connection of an account
//!
//! The transport (the WebSocket handler) owns each connection's lifecycle;
//! this crate only keeps the per-account registry, delivers events on a
//! best-effort basis and runs the heartbeat that evicts silent peers.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod broadcaster;
mod error;
mod event;

pub use broadcaster::{Connection, ConnectionId, HeartbeatReport, Outbound, SyncBroadcaster};
pub use error::SyncError;
pub use event::{ClientMessage, SyncEvent};
