use std::collections::HashMap;
use std::sync::Arc;

use crate::events::{TrackHandle, TrackKind, TrackSource, is_renderable};
use crate::transport::MediaTrack;

/// Subscribed remote tracks keyed by track id, plus the local capture tracks.
///
/// The remote map is an immutable snapshot: each mutation builds a new map
/// and swaps it in, so holders of an old `Arc` keep a consistent view and
/// observers see the change by pointer or `version`.
#[derive(Debug, Clone, Default)]
pub struct TrackRegistry {
    remote: Arc<HashMap<String, TrackHandle>>,
    local_camera: Option<MediaTrack>,
    local_microphone: Option<MediaTrack>,
    version: u64,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscribed remote track.
    ///
    /// Audio is always registered. Video only when its source is renderable;
    /// anything else is ignored. Returns whether the registry changed.
    pub fn on_subscribed(&mut self, handle: TrackHandle) -> bool {
        if handle.kind == TrackKind::Video && !is_renderable(handle.kind, handle.source) {
            tracing::debug!(
                "ignoring non-renderable video track {} ({:?})",
                handle.track_id,
                handle.source
            );
            return false;
        }
        let mut next = self.remote.as_ref().clone();
        next.insert(handle.track_id.clone(), handle);
        self.replace(next);
        true
    }

    /// Drop a remote track by id, whatever its kind. Unknown ids are a no-op.
    pub fn on_unsubscribed(&mut self, track_id: &str) -> bool {
        if !self.remote.contains_key(track_id) {
            return false;
        }
        let mut next = self.remote.as_ref().clone();
        next.remove(track_id);
        self.replace(next);
        true
    }

    pub fn on_local_published(&mut self, track: MediaTrack) -> bool {
        match (track.kind, track.source) {
            (TrackKind::Video, TrackSource::Camera) => {
                self.local_camera = Some(track);
            }
            (TrackKind::Audio, TrackSource::Microphone) => {
                self.local_microphone = Some(track);
            }
            _ => return false,
        }
        self.version += 1;
        true
    }

    pub fn on_local_unpublished(&mut self, kind: TrackKind, source: TrackSource) -> bool {
        let slot = match (kind, source) {
            (TrackKind::Video, TrackSource::Camera) => &mut self.local_camera,
            (TrackKind::Audio, TrackSource::Microphone) => &mut self.local_microphone,
            _ => return false,
        };
        if slot.take().is_none() {
            return false;
        }
        self.version += 1;
        true
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, TrackHandle>> {
        self.remote.clone()
    }

    pub fn get(&self, track_id: &str) -> Option<&TrackHandle> {
        self.remote.get(track_id)
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.remote.contains_key(track_id)
    }

    /// Remote tracks of one kind, ordered by track id.
    pub fn remote_tracks(&self, kind: TrackKind) -> Vec<MediaTrack> {
        let mut tracks: Vec<MediaTrack> = self
            .remote
            .values()
            .filter(|h| h.kind == kind)
            .map(|h| MediaTrack::new(h.track_id.clone(), h.kind, h.source))
            .collect();
        tracks.sort_by(|a, b| a.id.cmp(&b.id));
        tracks
    }

    pub fn local_camera(&self) -> Option<&MediaTrack> {
        self.local_camera.as_ref()
    }

    pub fn local_microphone(&self) -> Option<&MediaTrack> {
        self.local_microphone.as_ref()
    }

    pub fn len(&self) -> usize {
        self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn clear(&mut self) {
        self.local_camera = None;
        self.local_microphone = None;
        self.replace(HashMap::new());
    }

    fn replace(&mut self, next: HashMap<String, TrackHandle>) {
        self.remote = Arc::new(next);
        self.version += 1;
    }
}
