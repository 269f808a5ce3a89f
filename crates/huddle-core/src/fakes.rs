//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::auth::TokenProvider;
use crate::composition::ComposedStream;
use crate::errors::HuddleError;
use crate::events::{TrackKind, TrackSource};
use crate::transport::{
    CameraOptions, DataPacket, DeviceInfo, DeviceKind, EngineEvent, FacingMode, MediaDevices,
    MediaRecorder, MediaTrack, ParticipantRef, RecorderOptions, Transport,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

#[derive(Default)]
struct TransportState {
    calls: Vec<String>,
    failing: HashSet<String>,
    failing_facing: Vec<FacingMode>,
    sent: Vec<DataPacket>,
    remote: Vec<ParticipantRef>,
    events: Option<UnboundedSender<EngineEvent>>,
    connected_to: Option<(String, String)>,
    screen_without_video: bool,
}

/// Records every call. Any method name passed to `fail` returns an error.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(participants: Vec<ParticipantRef>) -> Self {
        let t = Self::new();
        lock(&t.state).remote = participants;
        t
    }

    pub fn fail(&self, method: &str) {
        lock(&self.state).failing.insert(method.to_string());
    }

    pub fn fail_camera_facing(&self, facing: FacingMode) {
        lock(&self.state).failing_facing.push(facing);
    }

    /// `create_screen_tracks` yields only the audio track.
    pub fn screen_tracks_without_video(&self) {
        lock(&self.state).screen_without_video = true;
    }

    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.state).calls.iter().filter(|c| *c == method).count()
    }

    pub fn sent_packets(&self) -> Vec<DataPacket> {
        lock(&self.state).sent.clone()
    }

    pub fn connected_to(&self) -> Option<(String, String)> {
        lock(&self.state).connected_to.clone()
    }

    /// Push a raw event into the subscribed stream.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &lock(&self.state).events {
            let _ = tx.send(event);
        }
    }

    fn record(&self, method: &str) -> Result<(), HuddleError> {
        let mut state = lock(&self.state);
        state.calls.push(method.to_string());
        if state.failing.contains(method) {
            return Err(HuddleError::Transport(format!("{method} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn subscribe(&self) -> UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        state.calls.push("subscribe".to_string());
        state.events = Some(tx);
        rx
    }

    async fn connect(&self, url: &str, token: &str) -> Result<(), HuddleError> {
        self.record("connect")?;
        lock(&self.state).connected_to = Some((url.to_string(), token.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), HuddleError> {
        lock(&self.state).connected_to = None;
        self.record("disconnect")
    }

    fn remote_participants(&self) -> Vec<ParticipantRef> {
        lock(&self.state).remote.clone()
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<Option<MediaTrack>, HuddleError> {
        self.record("set_microphone_enabled")?;
        Ok(enabled.then(|| MediaTrack::new("local-mic", TrackKind::Audio, TrackSource::Microphone)))
    }

    async fn set_camera_enabled(
        &self,
        enabled: bool,
        options: CameraOptions,
    ) -> Result<Option<MediaTrack>, HuddleError> {
        self.record("set_camera_enabled")?;
        if let Some(facing) = options.facing {
            if enabled && lock(&self.state).failing_facing.contains(&facing) {
                return Err(HuddleError::Device(format!("no camera facing {facing:?}")));
            }
        }
        Ok(enabled.then(|| MediaTrack::new("local-cam", TrackKind::Video, TrackSource::Camera)))
    }

    async fn set_track_muted(&self, _track: &MediaTrack, _muted: bool) -> Result<(), HuddleError> {
        self.record("set_track_muted")
    }

    async fn create_screen_tracks(&self, audio: bool) -> Result<Vec<MediaTrack>, HuddleError> {
        self.record("create_screen_tracks")?;
        let mut tracks = Vec::new();
        if !lock(&self.state).screen_without_video {
            tracks.push(MediaTrack::new("screen-video", TrackKind::Video, TrackSource::ScreenShare));
        }
        if audio {
            tracks.push(MediaTrack::new(
                "screen-audio",
                TrackKind::Audio,
                TrackSource::ScreenShareAudio,
            ));
        }
        Ok(tracks)
    }

    async fn publish_track(&self, _track: &MediaTrack) -> Result<(), HuddleError> {
        self.record("publish_track")
    }

    async fn unpublish_track(&self, _track: &MediaTrack, _stop: bool) -> Result<(), HuddleError> {
        self.record("unpublish_track")
    }

    async fn publish_data(&self, packet: DataPacket) -> Result<(), HuddleError> {
        self.record("publish_data")?;
        lock(&self.state).sent.push(packet);
        Ok(())
    }
}

struct DevicesState {
    devices: Vec<DeviceKind>,
    fail_enumeration: bool,
    fail_display: bool,
    supported: Option<Vec<String>>,
    recorders_started: usize,
    display_requests: usize,
    last_stream: Option<ComposedStream>,
}

pub struct FakeDevices {
    state: Mutex<DevicesState>,
}

impl FakeDevices {
    pub fn with_devices(kinds: &[DeviceKind]) -> Self {
        Self {
            state: Mutex::new(DevicesState {
                devices: kinds.to_vec(),
                fail_enumeration: false,
                fail_display: false,
                supported: None,
                recorders_started: 0,
                display_requests: 0,
                last_stream: None,
            }),
        }
    }

    /// Camera, microphone and speaker; every MIME type supported.
    pub fn all() -> Self {
        Self::with_devices(&[DeviceKind::VideoInput, DeviceKind::AudioInput, DeviceKind::AudioOutput])
    }

    pub fn fail_enumeration(&self) {
        lock(&self.state).fail_enumeration = true;
    }

    pub fn fail_display(&self) {
        lock(&self.state).fail_display = true;
    }

    pub fn set_supported_types(&self, types: &[&str]) {
        lock(&self.state).supported = Some(types.iter().map(|t| t.to_string()).collect());
    }

    pub fn recorders_started(&self) -> usize {
        lock(&self.state).recorders_started
    }

    pub fn display_requests(&self) -> usize {
        lock(&self.state).display_requests
    }

    pub fn last_stream(&self) -> Option<ComposedStream> {
        lock(&self.state).last_stream.clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, HuddleError> {
        let state = lock(&self.state);
        if state.fail_enumeration {
            return Err(HuddleError::Device("enumeration denied".into()));
        }
        Ok(state
            .devices
            .iter()
            .enumerate()
            .map(|(i, kind)| DeviceInfo {
                id: format!("dev-{i}"),
                kind: *kind,
                label: format!("{kind:?}"),
            })
            .collect())
    }

    async fn get_display_media(&self, audio: bool) -> Result<Vec<MediaTrack>, HuddleError> {
        let mut state = lock(&self.state);
        state.display_requests += 1;
        if state.fail_display {
            return Err(HuddleError::Device("display capture denied".into()));
        }
        let mut tracks = vec![MediaTrack::new("display-video", TrackKind::Video, TrackSource::ScreenShare)];
        if audio {
            tracks.push(MediaTrack::new(
                "display-audio",
                TrackKind::Audio,
                TrackSource::ScreenShareAudio,
            ));
        }
        Ok(tracks)
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        match &lock(&self.state).supported {
            Some(types) => types.iter().any(|t| t == mime_type),
            None => true,
        }
    }

    async fn start_recorder(
        &self,
        stream: ComposedStream,
        options: RecorderOptions,
    ) -> Result<Box<dyn MediaRecorder>, HuddleError> {
        let mut state = lock(&self.state);
        state.recorders_started += 1;
        state.last_stream = Some(stream);
        Ok(Box::new(FakeRecorder {
            mime_type: options.mime_type,
        }))
    }
}

/// Yields two fixed chunks on stop.
pub struct FakeRecorder {
    mime_type: String,
}

#[async_trait]
impl MediaRecorder for FakeRecorder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn stop(self: Box<Self>) -> Result<Vec<Vec<u8>>, HuddleError> {
        Ok(vec![b"chunk-0".to_vec(), Vec::new(), b"chunk-1".to_vec()])
    }
}

/// Hands out a fixed token, or fails when built with `failing`.
pub struct FakeTokenProvider {
    token: Option<String>,
    requests: Mutex<Vec<(String, String)>>,
}

impl FakeTokenProvider {
    pub fn new(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            token: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl TokenProvider for FakeTokenProvider {
    async fn fetch_token(&self, room_name: &str, participant_name: &str) -> Result<String, HuddleError> {
        lock(&self.requests).push((room_name.to_string(), participant_name.to_string()));
        self.token
            .clone()
            .ok_or_else(|| HuddleError::Auth("token service unavailable".into()))
    }
}
