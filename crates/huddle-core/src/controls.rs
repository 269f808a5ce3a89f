use crate::errors::HuddleError;
use crate::events::{TrackKind, TrackSource};
use crate::transport::{
    CameraOptions, DeviceKind, FacingMode, MediaDevices, MediaTrack, Resolution, Transport,
};

/// Result of bringing up one capture device.
///
/// A missing or failing device is never an error for the session: the
/// feature is left off and `notice` says why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capability {
    pub track: Option<MediaTrack>,
    pub notice: Option<String>,
}

/// Controls for local media (microphone, camera, screen share).
///
/// Holds what is currently on and the tracks the engine returned for it.
#[derive(Debug, Clone)]
pub struct LocalMediaControls {
    resolution: Resolution,
    facing: FacingMode,
    mic_on: bool,
    camera_on: bool,
    screen_sharing: bool,
    mic_track: Option<MediaTrack>,
    camera_track: Option<MediaTrack>,
    screen_tracks: Vec<MediaTrack>,
}

impl LocalMediaControls {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            facing: FacingMode::User,
            mic_on: false,
            camera_on: false,
            screen_sharing: false,
            mic_track: None,
            camera_track: None,
            screen_tracks: Vec::new(),
        }
    }

    pub fn is_microphone_on(&self) -> bool {
        self.mic_on
    }

    pub fn is_camera_on(&self) -> bool {
        self.camera_on
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    /// Camera or screen share, whichever is active.
    pub fn is_cam_or_share_on(&self) -> bool {
        self.camera_on || self.screen_sharing
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn camera_track(&self) -> Option<&MediaTrack> {
        self.camera_track.as_ref()
    }

    pub fn microphone_track(&self) -> Option<&MediaTrack> {
        self.mic_track.as_ref()
    }

    pub fn screen_tracks(&self) -> &[MediaTrack] {
        &self.screen_tracks
    }

    /// Check for a microphone, then enable it.
    pub async fn try_enable_microphone(
        &mut self,
        transport: &dyn Transport,
        devices: &dyn MediaDevices,
    ) -> Capability {
        if probe(devices, DeviceKind::AudioInput).await == Some(false) {
            self.mic_on = false;
            return Capability {
                track: None,
                notice: Some("No microphone detected - joining muted.".to_string()),
            };
        }

        match transport.set_microphone_enabled(true).await {
            Ok(track) => {
                tracing::info!("microphone enabled");
                self.mic_on = true;
                self.mic_track = track.clone();
                Capability { track, notice: None }
            }
            Err(e) => {
                tracing::warn!("could not enable microphone: {e}");
                self.mic_on = false;
                self.mic_track = None;
                Capability {
                    track: None,
                    notice: Some(format!("Could not enable microphone: {e}")),
                }
            }
        }
    }

    /// Check for a camera, then enable it without a facing constraint.
    pub async fn try_enable_camera(
        &mut self,
        transport: &dyn Transport,
        devices: &dyn MediaDevices,
    ) -> Capability {
        if probe(devices, DeviceKind::VideoInput).await == Some(false) {
            self.set_camera(None);
            return Capability {
                track: None,
                notice: Some("No camera detected - joining without video.".to_string()),
            };
        }

        match transport.set_camera_enabled(true, self.camera_options(None)).await {
            Ok(track) => {
                tracing::info!("camera enabled: {}", track.is_some());
                self.set_camera(track.clone());
                Capability { track, notice: None }
            }
            Err(e) => {
                tracing::warn!("could not enable camera: {e}");
                self.set_camera(None);
                Capability {
                    track: None,
                    notice: Some(format!("Could not enable camera: {e}. Continuing without video.")),
                }
            }
        }
    }

    /// Mute or unmute the published microphone, or enable it if there is no track yet.
    pub async fn toggle_microphone(&mut self, transport: &dyn Transport) -> Result<bool, HuddleError> {
        let next = !self.mic_on;
        if let Some(track) = self.mic_track.clone() {
            transport.set_track_muted(&track, !next).await?;
        } else {
            let track = transport.set_microphone_enabled(next).await?;
            if next {
                self.mic_track = track;
            }
        }
        self.mic_on = next;
        tracing::info!("microphone on: {next}");
        Ok(next)
    }

    /// Capture and publish the screen.
    ///
    /// If any track fails to publish, the ones already published are pulled
    /// back and the share stays off.
    pub async fn start_screen_share(
        &mut self,
        transport: &dyn Transport,
        audio: bool,
    ) -> Result<(), HuddleError> {
        if self.screen_sharing {
            return Ok(());
        }
        let tracks = transport
            .create_screen_tracks(audio)
            .await
            .map_err(|e| HuddleError::ScreenShare(e.to_string()))?;

        let mut published = Vec::with_capacity(tracks.len());
        for track in tracks {
            if let Err(e) = transport.publish_track(&track).await {
                tracing::warn!("publishing screen track {} failed: {e}", track.id);
                published.push(track);
                unpublish_all(transport, &published).await;
                return Err(HuddleError::ScreenShare(e.to_string()));
            }
            published.push(track);
        }

        tracing::info!("screen share started with {} tracks", published.len());
        self.screen_tracks = published;
        self.screen_sharing = true;
        Ok(())
    }

    /// Unpublish and stop every screen track. Safe to call when not sharing.
    pub async fn stop_screen_share(&mut self, transport: &dyn Transport) {
        let tracks = std::mem::take(&mut self.screen_tracks);
        unpublish_all(transport, &tracks).await;
        if self.screen_sharing {
            tracing::info!("screen share stopped");
        }
        self.screen_sharing = false;
    }

    pub async fn toggle_screen_share(&mut self, transport: &dyn Transport) -> Result<bool, HuddleError> {
        if self.screen_sharing {
            self.stop_screen_share(transport).await;
        } else {
            self.start_screen_share(transport, true).await?;
        }
        Ok(self.screen_sharing)
    }

    /// Turn camera and screen share on together, or both off.
    ///
    /// Turning on tries the front camera, then the back one, then goes on
    /// without video. A screen share that cannot start is logged and skipped.
    pub async fn toggle_cam_and_share(&mut self, transport: &dyn Transport) -> bool {
        if self.is_cam_or_share_on() {
            if self.camera_on {
                if let Err(e) = transport.set_camera_enabled(false, self.camera_options(None)).await {
                    tracing::debug!("disabling camera failed: {e}");
                }
                self.set_camera(None);
            }
            if self.screen_sharing {
                self.stop_screen_share(transport).await;
            }
            return false;
        }

        let front = transport
            .set_camera_enabled(true, self.camera_options(Some(FacingMode::User)))
            .await;
        let camera = match front {
            Ok(track) => {
                self.facing = FacingMode::User;
                track
            }
            Err(e1) => {
                tracing::warn!("front camera failed, trying back camera: {e1}");
                match transport
                    .set_camera_enabled(true, self.camera_options(Some(FacingMode::Environment)))
                    .await
                {
                    Ok(track) => {
                        self.facing = FacingMode::Environment;
                        track
                    }
                    Err(e2) => {
                        tracing::warn!("camera failed, continuing without video: {e2}");
                        None
                    }
                }
            }
        };
        self.set_camera(camera);

        if !self.screen_sharing {
            if let Err(e) = self.start_screen_share(transport, true).await {
                tracing::warn!("could not start screen share: {e}");
            }
        }
        self.is_cam_or_share_on()
    }

    /// Restart the camera facing the other way.
    pub async fn flip_camera(&mut self, transport: &dyn Transport) -> Result<FacingMode, HuddleError> {
        let next = self.facing.flipped();
        transport.set_camera_enabled(false, self.camera_options(None)).await?;
        let track = transport
            .set_camera_enabled(true, self.camera_options(Some(next)))
            .await?;
        self.facing = next;
        self.set_camera(track);
        Ok(next)
    }

    /// Engine confirmed a local publication.
    pub fn on_local_published(&mut self, track: &MediaTrack) {
        match (track.kind, track.source) {
            (TrackKind::Video, TrackSource::Camera) => self.set_camera(Some(track.clone())),
            (TrackKind::Audio, TrackSource::Microphone) => {
                self.mic_on = true;
                self.mic_track = Some(track.clone());
            }
            _ => {}
        }
    }

    /// Engine confirmed a local unpublication.
    pub fn on_local_unpublished(&mut self, track: &MediaTrack) {
        match (track.kind, track.source) {
            (TrackKind::Video, TrackSource::Camera) => self.set_camera(None),
            (TrackKind::Audio, TrackSource::Microphone) => {
                self.mic_on = false;
                self.mic_track = None;
            }
            _ => {}
        }
    }

    /// Whether an ended local track belongs to the current screen share.
    pub fn is_screen_track(&self, track_id: &str) -> bool {
        self.screen_tracks.iter().any(|t| t.id == track_id)
    }

    /// Back to the state before join.
    pub fn reset(&mut self) {
        *self = Self::new(self.resolution);
    }

    fn set_camera(&mut self, track: Option<MediaTrack>) {
        self.camera_on = track.is_some();
        self.camera_track = track;
    }

    fn camera_options(&self, facing: Option<FacingMode>) -> CameraOptions {
        CameraOptions {
            facing,
            resolution: self.resolution,
        }
    }
}

/// `Some(present)` if devices could be listed, `None` if enumeration failed.
async fn probe(devices: &dyn MediaDevices, kind: DeviceKind) -> Option<bool> {
    match devices.enumerate_devices().await {
        Ok(list) => Some(list.iter().any(|d| d.kind == kind)),
        Err(e) => {
            tracing::debug!("device enumeration failed: {e}");
            None
        }
    }
}

async fn unpublish_all(transport: &dyn Transport, tracks: &[MediaTrack]) {
    for track in tracks {
        if let Err(e) = transport.unpublish_track(track, true).await {
            tracing::debug!("unpublishing {} failed: {e}", track.id);
        }
    }
}
