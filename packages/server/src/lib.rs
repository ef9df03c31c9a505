//! Presence and team-coordination relay.
//!
//! Players and a host connect over WebSocket, authenticate into a room and
//! exchange events for team membership, mute signaling and opaque audio-stream
//! forwarding. Team mutations are serialized per team name; identity
//! connect/disconnect handling is serialized per identity id.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

// Re-export entry points
pub use config::ServerConfig;
pub use ui::{ServerError, run, run_until};
