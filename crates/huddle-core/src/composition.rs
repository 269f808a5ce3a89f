//! Local recording of the call.
//!
//! A preset picks which live tracks go into the recording. Video tracks are
//! passed through side by side; every audio source is mixed into one track.
//! The composed stream only lives while recording and never owns the source
//! tracks, which stay with the session.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::controls::LocalMediaControls;
use crate::errors::HuddleError;
use crate::events::TrackKind;
use crate::mixer::AudioMixer;
use crate::tracks::TrackRegistry;
use crate::transport::{MediaDevices, MediaRecorder, MediaTrack, RecorderOptions, Transport};

/// Recorder formats in order of preference.
pub const MIME_CANDIDATES: [&str; 3] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
];

const VIDEO_BITS_PER_SECOND: u32 = 4_000_000;
const TIMESLICE_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CapturePreset {
    /// Local camera and microphone.
    LocalOnly,
    /// Local camera and microphone plus every subscribed remote track.
    LocalPlusRemote,
    /// The screen share, started on demand.
    ScreenShare,
}

impl CapturePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOnly => "localOnly",
            Self::LocalPlusRemote => "localPlusRemote",
            Self::ScreenShare => "screenShare",
        }
    }
}

impl fmt::Display for CapturePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapturePreset {
    type Err = HuddleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localOnly" => Ok(Self::LocalOnly),
            "localPlusRemote" => Ok(Self::LocalPlusRemote),
            "screenShare" => Ok(Self::ScreenShare),
            other => Err(HuddleError::Recording(format!("unknown preset '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

/// Sources resolved for a preset, before mixing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionRequest {
    pub preset: CapturePreset,
    pub video_tracks: Vec<MediaTrack>,
    pub audio_tracks: Vec<MediaTrack>,
}

impl CompositionRequest {
    fn new(preset: CapturePreset) -> Self {
        Self {
            preset,
            video_tracks: Vec::new(),
            audio_tracks: Vec::new(),
        }
    }

    fn add(&mut self, track: MediaTrack) {
        let bucket = match track.kind {
            TrackKind::Video => &mut self.video_tracks,
            TrackKind::Audio => &mut self.audio_tracks,
        };
        if !bucket.iter().any(|t| t.id == track.id) {
            bucket.push(track);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video_tracks.is_empty() && self.audio_tracks.is_empty()
    }
}

/// What the recorder consumes: pass-through video plus at most one mixed audio track.
#[derive(Debug, Clone)]
pub struct ComposedStream {
    pub video_tracks: Vec<MediaTrack>,
    pub mixer: Option<Arc<AudioMixer>>,
}

impl ComposedStream {
    fn compose(request: &CompositionRequest) -> Self {
        let mixer = if request.audio_tracks.is_empty() {
            None
        } else {
            let mixer = AudioMixer::new();
            for track in &request.audio_tracks {
                if let Err(e) = mixer.connect(track) {
                    tracing::warn!("skipping audio source {}: {e}", track.id);
                }
            }
            Some(Arc::new(mixer))
        };
        Self {
            video_tracks: request.video_tracks.clone(),
            mixer,
        }
    }

    pub fn mixed_audio(&self) -> Option<&MediaTrack> {
        self.mixer.as_ref().map(|m| m.output_track())
    }

    /// Every track of the stream: video first, then the mixed audio.
    pub fn tracks(&self) -> Vec<MediaTrack> {
        let mut tracks = self.video_tracks.clone();
        tracks.extend(self.mixed_audio().cloned());
        tracks
    }

    fn release(&self) {
        if let Some(mixer) = &self.mixer {
            mixer.clear();
        }
    }
}

/// A finished recording, ready to be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl RecordingArtifact {
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf, HuddleError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}

/// Everything a preset may draw from. Borrowed for one `start_recording` call.
pub struct CompositionContext<'a> {
    pub registry: &'a TrackRegistry,
    pub controls: &'a mut LocalMediaControls,
    pub transport: &'a dyn Transport,
    pub devices: &'a dyn MediaDevices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionOptions {
    /// Fold the local microphone into screen recordings.
    pub screen_with_microphone: bool,
    /// Fold remote audio into screen recordings.
    pub screen_with_remote_audio: bool,
}

impl Default for CompositionOptions {
    fn default() -> Self {
        Self {
            screen_with_microphone: true,
            screen_with_remote_audio: false,
        }
    }
}

struct ActiveRecording {
    preset: CapturePreset,
    recorder: Box<dyn MediaRecorder>,
    stream: ComposedStream,
}

/// Idle → Recording → Idle.
pub struct MediaCompositionEngine {
    options: CompositionOptions,
    active: Option<ActiveRecording>,
}

impl MediaCompositionEngine {
    pub fn new(options: CompositionOptions) -> Self {
        Self {
            options,
            active: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        if self.active.is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn active_preset(&self) -> Option<CapturePreset> {
        self.active.as_ref().map(|a| a.preset)
    }

    /// Tracks of the stream being recorded, if any.
    pub fn composed_tracks(&self) -> Vec<MediaTrack> {
        self.active
            .as_ref()
            .map(|a| a.stream.tracks())
            .unwrap_or_default()
    }

    /// Collect the sources a preset asks for.
    pub async fn resolve(
        &self,
        preset: CapturePreset,
        ctx: &mut CompositionContext<'_>,
    ) -> Result<CompositionRequest, HuddleError> {
        let mut request = CompositionRequest::new(preset);

        match preset {
            CapturePreset::LocalOnly | CapturePreset::LocalPlusRemote => {
                request.video_tracks.extend(ctx.registry.local_camera().cloned());
                request.audio_tracks.extend(ctx.registry.local_microphone().cloned());
                if preset == CapturePreset::LocalPlusRemote {
                    for track in ctx.registry.remote_tracks(TrackKind::Video) {
                        request.add(track);
                    }
                    for track in ctx.registry.remote_tracks(TrackKind::Audio) {
                        request.add(track);
                    }
                }
            }
            CapturePreset::ScreenShare => {
                if !ctx.controls.is_screen_sharing() {
                    ctx.controls.start_screen_share(ctx.transport, true).await?;
                }
                for track in ctx.controls.screen_tracks() {
                    request.add(track.clone());
                }

                if request.video_tracks.is_empty() {
                    tracing::info!("no screen video from the share, requesting display capture");
                    let tracks = ctx
                        .devices
                        .get_display_media(true)
                        .await
                        .map_err(|e| HuddleError::Device(e.to_string()))?;
                    for track in tracks {
                        request.add(track);
                    }
                }

                if self.options.screen_with_microphone {
                    if let Some(mic) = ctx.registry.local_microphone() {
                        request.add(mic.clone());
                    }
                }
                if self.options.screen_with_remote_audio {
                    for track in ctx.registry.remote_tracks(TrackKind::Audio) {
                        request.add(track);
                    }
                }
            }
        }

        Ok(request)
    }

    /// Start recording with `preset`. Returns `false` if already recording.
    pub async fn start_recording(
        &mut self,
        preset: CapturePreset,
        mut ctx: CompositionContext<'_>,
    ) -> Result<bool, HuddleError> {
        if self.active.is_some() {
            return Ok(false);
        }

        let request = self.resolve(preset, &mut ctx).await?;
        if request.is_empty() {
            return Err(HuddleError::NothingToRecord);
        }

        let stream = ComposedStream::compose(&request);
        let mime_type = select_mime_type(ctx.devices);
        let recorder = ctx
            .devices
            .start_recorder(
                stream.clone(),
                RecorderOptions {
                    mime_type: mime_type.to_string(),
                    video_bits_per_second: VIDEO_BITS_PER_SECOND,
                    timeslice_ms: TIMESLICE_MS,
                },
            )
            .await
            .map_err(|e| {
                stream.release();
                HuddleError::Recording(e.to_string())
            })?;

        tracing::info!(
            "recording {preset} with {} video tracks and {} mixed audio sources as {mime_type}",
            request.video_tracks.len(),
            request.audio_tracks.len()
        );
        self.active = Some(ActiveRecording {
            preset,
            recorder,
            stream,
        });
        Ok(true)
    }

    /// Stop and finalize. `None` when nothing was recording.
    ///
    /// The engine is idle afterwards even if the recorder fails to flush.
    pub async fn stop_recording(&mut self) -> Result<Option<RecordingArtifact>, HuddleError> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };

        let mime_type = active.recorder.mime_type().to_string();
        let result = active.recorder.stop().await;
        active.stream.release();
        let chunks = result.map_err(|e| HuddleError::Recording(e.to_string()))?;

        let data: Vec<u8> = chunks.into_iter().filter(|c| !c.is_empty()).flatten().collect();
        let file_name = recording_file_name(active.preset, Utc::now(), container_extension(&mime_type));
        tracing::info!("recording finalized: {file_name} ({} bytes)", data.len());

        Ok(Some(RecordingArtifact {
            file_name,
            mime_type,
            data,
        }))
    }
}

/// First candidate the recorder supports, else the generic container.
pub fn select_mime_type(devices: &dyn MediaDevices) -> &'static str {
    MIME_CANDIDATES
        .iter()
        .copied()
        .find(|m| devices.is_type_supported(m))
        .unwrap_or(MIME_CANDIDATES[MIME_CANDIDATES.len() - 1])
}

fn container_extension(mime_type: &str) -> &'static str {
    if mime_type.starts_with("video/mp4") {
        "mp4"
    } else {
        "webm"
    }
}

/// `record-<preset>-<timestamp>.<ext>` with `:` and `.` in the timestamp replaced by `-`.
pub fn recording_file_name(preset: CapturePreset, at: DateTime<Utc>, extension: &str) -> String {
    let ts = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("record-{preset}-{ts}.{extension}")
}
