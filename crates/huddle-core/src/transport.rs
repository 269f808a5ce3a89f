//! Interfaces of the real-time engine the session is built on.
//!
//! The engine owns signaling, media transport and device capture. The core
//! only sees it through these traits and the raw [`EngineEvent`] stream.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::errors::HuddleError;
use crate::events::{TrackKind, TrackSource};

/// A media track as exposed by the engine: an opaque id plus its category.
///
/// The bytes behind it never pass through the core; recorders and renderers
/// resolve the id on the engine side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub source: TrackSource,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, source: TrackSource) -> Self {
        Self {
            id: id.into(),
            kind,
            source,
        }
    }
}

/// Identity and display name of a participant as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRef {
    pub identity: String,
    pub name: Option<String>,
}

impl ParticipantRef {
    pub fn new(identity: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            identity: identity.into(),
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
        }
    }

    /// Display label: the name if set, the identity otherwise.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.identity.clone())
    }
}

/// Raw notifications delivered by the engine, in engine order.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ParticipantConnected(ParticipantRef),
    ParticipantDisconnected(ParticipantRef),
    /// `participant.name` still holds the name before the change.
    ParticipantNameChanged {
        participant: ParticipantRef,
        name: String,
    },
    TrackSubscribed {
        track: MediaTrack,
        participant: ParticipantRef,
    },
    TrackUnsubscribed {
        track_id: String,
        participant: ParticipantRef,
    },
    LocalTrackPublished(MediaTrack),
    LocalTrackUnpublished(MediaTrack),
    /// A local capture track stopped on its own (e.g. the OS ended a share).
    LocalTrackEnded(MediaTrack),
    DataReceived {
        payload: Vec<u8>,
        topic: Option<String>,
        participant: Option<ParticipantRef>,
    },
    Reconnecting,
    Reconnected,
    Disconnected {
        reason: String,
    },
}

/// One outbound data-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub payload: Vec<u8>,
    pub topic: Option<String>,
    pub reliable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

impl FacingMode {
    pub fn flipped(self) -> Self {
        match self {
            Self::User => Self::Environment,
            Self::Environment => Self::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Camera capture constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraOptions {
    /// `None` lets the device pick, which avoids over-constrained errors on desktops.
    pub facing: Option<FacingMode>,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
    AudioOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Connection to the real-time engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the raw event stream. Called once per session, before `connect`.
    fn subscribe(&self) -> UnboundedReceiver<EngineEvent>;

    async fn connect(&self, url: &str, token: &str) -> Result<(), HuddleError>;

    async fn disconnect(&self) -> Result<(), HuddleError>;

    /// Remote participants already in the room when `connect` returned.
    fn remote_participants(&self) -> Vec<ParticipantRef>;

    /// Enable or disable the microphone; returns the published track when enabled.
    async fn set_microphone_enabled(&self, enabled: bool) -> Result<Option<MediaTrack>, HuddleError>;

    /// Enable or disable the camera; returns the published track when enabled.
    async fn set_camera_enabled(
        &self,
        enabled: bool,
        options: CameraOptions,
    ) -> Result<Option<MediaTrack>, HuddleError>;

    /// Mute or unmute a published local track without unpublishing it.
    async fn set_track_muted(&self, track: &MediaTrack, muted: bool) -> Result<(), HuddleError>;

    /// Capture the screen (and system audio if asked and allowed). Not published yet.
    async fn create_screen_tracks(&self, audio: bool) -> Result<Vec<MediaTrack>, HuddleError>;

    async fn publish_track(&self, track: &MediaTrack) -> Result<(), HuddleError>;

    async fn unpublish_track(&self, track: &MediaTrack, stop_on_unpublish: bool) -> Result<(), HuddleError>;

    async fn publish_data(&self, packet: DataPacket) -> Result<(), HuddleError>;
}

/// Capture devices, display capture and the container recorder.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, HuddleError>;

    /// Direct display capture, not published to the room.
    async fn get_display_media(&self, audio: bool) -> Result<Vec<MediaTrack>, HuddleError>;

    /// Whether the recorder can produce the given MIME type.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Record `stream`. The backend feeds each audio source into the stream's
    /// mixer with [`AudioMixer::push_samples`](crate::mixer::AudioMixer::push_samples)
    /// and encodes what [`AudioMixer::pull_mixed`](crate::mixer::AudioMixer::pull_mixed)
    /// returns as the single audio track.
    async fn start_recorder(
        &self,
        stream: crate::composition::ComposedStream,
        options: RecorderOptions,
    ) -> Result<Box<dyn MediaRecorder>, HuddleError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderOptions {
    pub mime_type: String,
    pub video_bits_per_second: u32,
    /// How often the recorder flushes a data chunk.
    pub timeslice_ms: u32,
}

/// A running recorder over a composed stream.
#[async_trait]
pub trait MediaRecorder: Send + Sync {
    fn mime_type(&self) -> &str;

    /// Stop and return every buffered data chunk, in order.
    async fn stop(self: Box<Self>) -> Result<Vec<Vec<u8>>, HuddleError>;
}
