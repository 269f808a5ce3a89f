use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::composition::RecordingState;
use crate::roster::RosterEntry;
use crate::transfer::ReceivedFile;

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    RosterChanged(Arc<Vec<RosterEntry>>),
    TracksChanged(Arc<HashMap<String, TrackHandle>>),
    ChatMessageAppended(ChatMessage),
    FileReceived(ReceivedFile),
    RecordingStateChanged(RecordingState),
    RecordingSaved { file_name: String, size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Camera,
    ScreenShare,
    ScreenShareAudio,
    Microphone,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: String,
    pub name: Option<String>,
    pub state: MembershipState,
}

impl Participant {
    pub fn display_label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identity)
    }
}

/// A subscribed remote track (or the local camera) as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHandle {
    pub track_id: String,
    pub owner_identity: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub renderable: bool,
}

impl TrackHandle {
    pub fn new(track_id: String, owner_identity: String, kind: TrackKind, source: TrackSource) -> Self {
        let renderable = is_renderable(kind, source);
        Self {
            track_id,
            owner_identity,
            kind,
            source,
            renderable,
        }
    }
}

/// Video from a camera, a screen share, or an unknown source is displayed.
/// Everything else is tracked without being rendered.
pub fn is_renderable(kind: TrackKind, source: TrackSource) -> bool {
    kind == TrackKind::Video
        && matches!(
            source,
            TrackSource::Camera | TrackSource::ScreenShare | TrackSource::Unknown
        )
}

/// Sender label used for notices generated by the client itself.
pub const SYSTEM_SENDER: &str = "System";

/// Sender label for messages typed locally.
pub const LOCAL_SENDER: &str = "Me";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub timestamp_ms: u64,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis() as u64,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SYSTEM_SENDER, text)
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl SessionEventListener for CountingListener {
        fn on_event(&self, _event: SessionEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emitter_dispatches_to_multiple_listeners() {
        let emitter = EventEmitter::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        emitter.add_listener(Arc::new(CountingListener { count: count1.clone() }));
        emitter.add_listener(Arc::new(CountingListener { count: count2.clone() }));

        emitter.emit(SessionEvent::ConnectionStateChanged(ConnectionState::Connected));

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn renderability_by_source() {
        assert!(is_renderable(TrackKind::Video, TrackSource::Camera));
        assert!(is_renderable(TrackKind::Video, TrackSource::ScreenShare));
        assert!(is_renderable(TrackKind::Video, TrackSource::Unknown));
        assert!(!is_renderable(TrackKind::Video, TrackSource::Microphone));
        assert!(!is_renderable(TrackKind::Video, TrackSource::ScreenShareAudio));
        assert!(!is_renderable(TrackKind::Audio, TrackSource::Microphone));
    }

    #[test]
    fn participant_label_falls_back_to_identity() {
        let p = Participant {
            identity: "id-7".into(),
            name: None,
            state: MembershipState::Joined,
        };
        assert_eq!(p.display_label(), "id-7");
    }
}
