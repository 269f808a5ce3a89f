//! Huddle core: the client side of a real-time room session.
//!
//! Pure Rust crate with no platform dependencies. The media engine, capture
//! devices and token service are reached through the traits in
//! [`transport`] and [`auth`]; a UI shell drives [`SessionController`] and
//! listens for [`SessionEvent`]s.

pub mod auth;
pub mod chat;
pub mod composition;
pub mod config;
pub mod controls;
pub mod errors;
pub mod events;
pub mod logging;
pub mod mixer;
pub mod normalizer;
pub mod roster;
pub mod router;
pub mod session;
pub mod tracks;
pub mod transfer;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod fakes;

pub use auth::{HttpTokenProvider, TokenProvider};
pub use composition::{CapturePreset, RecordingArtifact, RecordingState};
pub use config::{SessionConfig, VideoPreset};
pub use errors::HuddleError;
pub use events::{ConnectionState, SessionEvent, SessionEventListener};
pub use session::SessionController;
pub use transfer::{OutgoingFile, ReceivedFile};
pub use transport::{EngineEvent, MediaDevices, MediaRecorder, Transport};
