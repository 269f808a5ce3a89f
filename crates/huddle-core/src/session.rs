use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::auth::{HttpTokenProvider, TokenProvider};
use crate::chat::ChatLog;
use crate::composition::{
    CapturePreset, CompositionContext, CompositionOptions, MediaCompositionEngine,
    RecordingArtifact, RecordingState,
};
use crate::config::SessionConfig;
use crate::controls::{Capability, LocalMediaControls};
use crate::errors::HuddleError;
use crate::events::{
    ChatMessage, ConnectionState, EventEmitter, LOCAL_SENDER, SessionEvent, SessionEventListener,
    TrackHandle, TrackKind, TrackSource,
};
use crate::normalizer::{DataMessage, DomainEvent, EventNormalizer};
use crate::roster::{RosterEntry, RosterStore};
use crate::router::{InboundHandler, MessageRouter};
use crate::tracks::TrackRegistry;
use crate::transfer::{
    ChunkOutcome, FileTransferEngine, OutgoingFile, ReceivedFile, received_notice, sent_notice,
};
use crate::transport::{EngineEvent, FacingMode, MediaDevices, MediaTrack, Transport};
use crate::wire::FileMeta;

/// One room session: join/leave, local media, chat, files and recording.
///
/// Engine events are consumed by a background task started at `join`.
/// Each component sits behind its own lock; when more than one is needed
/// they are taken in the order recording, controls, tracks, roster, chat,
/// transfers.
pub struct SessionController {
    config: SessionConfig,
    devices: Arc<dyn MediaDevices>,
    tokens: Arc<dyn TokenProvider>,
    router: MessageRouter,
    shared: Shared,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

/// State shared with the event loop.
#[derive(Clone)]
struct Shared {
    transport: Arc<dyn Transport>,
    emitter: EventEmitter,
    connection_state: Arc<Mutex<ConnectionState>>,
    local_name: Arc<Mutex<Option<String>>>,
    roster: Arc<Mutex<RosterStore>>,
    tracks: Arc<Mutex<TrackRegistry>>,
    chat: Arc<Mutex<ChatLog>>,
    transfers: Arc<Mutex<FileTransferEngine>>,
    controls: Arc<Mutex<LocalMediaControls>>,
    recording: Arc<Mutex<MediaCompositionEngine>>,
    recording_dir: Option<PathBuf>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn MediaDevices>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let controls = LocalMediaControls::new(config.camera_resolution.resolution());
        let recording = MediaCompositionEngine::new(CompositionOptions {
            screen_with_microphone: config.record_screen_with_microphone,
            screen_with_remote_audio: config.record_screen_with_remote_audio,
        });
        let recording_dir = config.recording_dir.clone();
        Self {
            config,
            devices,
            tokens,
            router: MessageRouter::new(transport.clone()),
            shared: Shared {
                transport,
                emitter: EventEmitter::new(),
                connection_state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
                local_name: Arc::new(Mutex::new(None)),
                roster: Arc::new(Mutex::new(RosterStore::new())),
                tracks: Arc::new(Mutex::new(TrackRegistry::new())),
                chat: Arc::new(Mutex::new(ChatLog::new())),
                transfers: Arc::new(Mutex::new(FileTransferEngine::new())),
                controls: Arc::new(Mutex::new(controls)),
                recording: Arc::new(Mutex::new(recording)),
                recording_dir,
            },
            event_task: Mutex::new(None),
        }
    }

    /// Tokens come from `<application_server_url>/token`.
    pub fn with_http_tokens(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Self, HuddleError> {
        let tokens = Arc::new(HttpTokenProvider::from_config(&config)?);
        Ok(Self::new(config, transport, devices, tokens))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    /// Join the configured room.
    ///
    /// A missing or failing camera or microphone never fails the join; it is
    /// announced in the chat instead. A token or connect failure is logged
    /// and tears the session down again; it is also returned to the caller
    /// rather than only logged.
    ///
    /// Joining again is allowed once the session is `Disconnected`, whether
    /// through `leave` or because the engine dropped the connection.
    pub async fn join(&self) -> Result<(), HuddleError> {
        if *self.shared.connection_state.lock().await != ConnectionState::Disconnected {
            return Err(HuddleError::Connection("session already joined".into()));
        }
        self.config.validate()?;
        self.shared.set_connection_state(ConnectionState::Connecting).await;

        let events = self.shared.transport.subscribe();
        let shared = self.shared.clone();
        let prune_every = Duration::from_secs(self.config.transfer_stale_after_secs.max(1));
        let task = tokio::spawn(async move {
            Self::event_loop(events, shared, prune_every).await;
        });
        if let Some(stale) = self.event_task.lock().await.replace(task) {
            stale.abort();
        }

        if let Err(e) = self.connect_and_negotiate().await {
            tracing::error!("join failed: {e}");
            self.leave().await;
            return Err(e);
        }
        Ok(())
    }

    async fn connect_and_negotiate(&self) -> Result<(), HuddleError> {
        let name = self.config.identity_name();
        let token = self.tokens.fetch_token(&self.config.room_name, &name).await?;

        tracing::info!("connecting to {} as {name}", self.config.server_url);
        self.shared
            .transport
            .connect(&self.config.server_url, &token)
            .await
            .map_err(|e| HuddleError::Connection(e.to_string()))?;
        *self.shared.local_name.lock().await = Some(name.clone());
        self.shared.set_connection_state(ConnectionState::Connected).await;

        let mut capabilities: Vec<Capability> = Vec::new();
        {
            let mut controls = self.shared.controls.lock().await;
            let transport = self.shared.transport.as_ref();
            if self.config.mic_enabled_on_join {
                capabilities.push(controls.try_enable_microphone(transport, self.devices.as_ref()).await);
            }
            if self.config.camera_enabled_on_join {
                capabilities.push(controls.try_enable_camera(transport, self.devices.as_ref()).await);
            }
            self.shared.sync_local_tracks(&controls).await;
        }
        for notice in capabilities.into_iter().filter_map(|c| c.notice) {
            self.shared.notice(notice).await;
        }

        let existing = self.shared.transport.remote_participants();
        let mut roster = self.shared.roster.lock().await;
        roster.seed(
            RosterEntry {
                identity: name.clone(),
                label: name,
            },
            existing.into_iter().map(|p| RosterEntry {
                label: p.label(),
                identity: p.identity,
            }),
        );
        tracing::info!("joined with {} participants", roster.len());
        self.shared.emitter.emit(SessionEvent::RosterChanged(roster.entries()));
        Ok(())
    }

    /// Leave the room and reset everything. Safe to call at any time.
    pub async fn leave(&self) {
        if let Err(e) = self.stop_recording().await {
            tracing::warn!("recording lost on leave: {e}");
        }

        {
            let mut controls = self.shared.controls.lock().await;
            if controls.is_screen_sharing() {
                controls.stop_screen_share(self.shared.transport.as_ref()).await;
            }
            controls.reset();
        }

        if let Err(e) = self.shared.transport.disconnect().await {
            tracing::debug!("disconnect failed: {e}");
        }
        if let Some(task) = self.event_task.lock().await.take() {
            task.abort();
        }

        *self.shared.local_name.lock().await = None;
        self.shared.reset_room_state().await;
        self.shared.chat.lock().await.clear();
        self.shared.transfers.lock().await.clear();
        self.shared.set_connection_state(ConnectionState::Disconnected).await;
        tracing::info!("left the session");
    }

    /// Apply one raw engine event, exactly as the background loop does.
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        self.shared.handle(event).await;
    }

    /// Apply engine events as they arrive and drop idle inbound transfers
    /// every `prune_every`.
    async fn event_loop(mut events: UnboundedReceiver<EngineEvent>, shared: Shared, prune_every: Duration) {
        let mut prune = tokio::time::interval_at(tokio::time::Instant::now() + prune_every, prune_every);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => shared.handle(event).await,
                    None => break,
                },
                _ = prune.tick() => {
                    shared.transfers.lock().await.prune_stale(prune_every);
                }
            }
        }
        tracing::info!("session event loop ended");
    }

    // ── Chat and files ──────────────────────────────────────────────

    /// Send a chat line. Blank text is ignored.
    pub async fn send_chat(&self, text: &str) -> Result<(), HuddleError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.ensure_connected().await?;
        self.router.send_chat(text).await?;

        let msg = self.shared.chat.lock().await.push(ChatMessage::new(LOCAL_SENDER, text));
        self.shared.emitter.emit(SessionEvent::ChatMessageAppended(msg));
        Ok(())
    }

    pub async fn send_file(&self, file: &OutgoingFile) -> Result<FileMeta, HuddleError> {
        self.ensure_connected().await?;
        let meta = FileTransferEngine::send(&self.router, file)
            .await
            .inspect_err(|e| tracing::warn!("sending {} failed: {e}", file.name))?;
        self.shared.notice(sent_notice(&meta)).await;
        Ok(meta)
    }

    pub async fn send_file_from_path(&self, path: &Path) -> Result<FileMeta, HuddleError> {
        let file = OutgoingFile::from_path(path, None).await?;
        self.send_file(&file).await
    }

    /// Drop inbound transfers idle longer than `transfer_stale_after_secs`.
    pub async fn prune_stale_transfers(&self) -> Vec<String> {
        let max_idle = Duration::from_secs(self.config.transfer_stale_after_secs);
        self.shared.transfers.lock().await.prune_stale(max_idle)
    }

    // ── Local media ─────────────────────────────────────────────────

    pub async fn toggle_microphone(&self) -> Result<bool, HuddleError> {
        self.ensure_connected().await?;
        let mut controls = self.shared.controls.lock().await;
        let on = controls.toggle_microphone(self.shared.transport.as_ref()).await?;
        self.shared.sync_local_tracks(&controls).await;
        Ok(on)
    }

    /// Start or stop the screen share. A share that cannot start is announced.
    pub async fn toggle_screen_share(&self) -> Result<bool, HuddleError> {
        self.ensure_connected().await?;
        let result = {
            let mut controls = self.shared.controls.lock().await;
            controls.toggle_screen_share(self.shared.transport.as_ref()).await
        };
        match result {
            Ok(sharing) => Ok(sharing),
            Err(e) => {
                tracing::warn!("screen share failed: {e}");
                self.shared.notice("Could not start screen share.").await;
                Ok(false)
            }
        }
    }

    /// Camera and screen share together: both on, or both off.
    pub async fn toggle_cam_and_share(&self) -> Result<bool, HuddleError> {
        self.ensure_connected().await?;
        let mut controls = self.shared.controls.lock().await;
        let on = controls.toggle_cam_and_share(self.shared.transport.as_ref()).await;
        self.shared.sync_local_tracks(&controls).await;
        Ok(on)
    }

    pub async fn flip_camera(&self) -> Result<FacingMode, HuddleError> {
        self.ensure_connected().await?;
        let mut controls = self.shared.controls.lock().await;
        let result = controls.flip_camera(self.shared.transport.as_ref()).await;
        self.shared.sync_local_tracks(&controls).await;
        result
    }

    // ── Recording ───────────────────────────────────────────────────

    /// Start recording with a preset. Returns whether a recording started;
    /// failures are announced in the chat.
    pub async fn start_recording(&self, preset: CapturePreset) -> bool {
        let result = {
            let mut recording = self.shared.recording.lock().await;
            let mut controls = self.shared.controls.lock().await;
            let result = {
                let tracks = self.shared.tracks.lock().await;
                recording
                    .start_recording(
                        preset,
                        CompositionContext {
                            registry: &tracks,
                            controls: &mut controls,
                            transport: self.shared.transport.as_ref(),
                            devices: self.devices.as_ref(),
                        },
                    )
                    .await
            };
            self.shared.sync_local_tracks(&controls).await;
            result
        };

        match result {
            Ok(true) => {
                self.shared
                    .emitter
                    .emit(SessionEvent::RecordingStateChanged(RecordingState::Recording));
                self.shared.notice(format!("Recording started ({preset})")).await;
                true
            }
            Ok(false) => {
                tracing::debug!("already recording, {preset} ignored");
                false
            }
            Err(e) => {
                tracing::warn!("could not start {preset} recording: {e}");
                let notice = match e {
                    HuddleError::NothingToRecord => "No tracks to record.".to_string(),
                    HuddleError::ScreenShare(_) => "Could not start screen share.".to_string(),
                    HuddleError::Device(_) => "Could not capture the screen for recording.".to_string(),
                    other => format!("Could not start recording: {other}"),
                };
                self.shared.notice(notice).await;
                false
            }
        }
    }

    /// Stop recording and return the artifact, also written to
    /// `recording_dir` when one is configured. `None` if not recording.
    pub async fn stop_recording(&self) -> Result<Option<RecordingArtifact>, HuddleError> {
        self.shared.stop_recording().await
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state.lock().await.clone()
    }

    /// The participant name used for this session, once connected.
    pub async fn local_name(&self) -> Option<String> {
        self.shared.local_name.lock().await.clone()
    }

    pub async fn roster(&self) -> Arc<Vec<RosterEntry>> {
        self.shared.roster.lock().await.entries()
    }

    pub async fn remote_tracks(&self) -> Arc<std::collections::HashMap<String, TrackHandle>> {
        self.shared.tracks.lock().await.snapshot()
    }

    pub async fn local_camera(&self) -> Option<MediaTrack> {
        self.shared.tracks.lock().await.local_camera().cloned()
    }

    pub async fn local_microphone(&self) -> Option<MediaTrack> {
        self.shared.tracks.lock().await.local_microphone().cloned()
    }

    pub async fn chat_messages(&self) -> Arc<Vec<ChatMessage>> {
        self.shared.chat.lock().await.messages()
    }

    pub async fn received_files(&self) -> Arc<Vec<ReceivedFile>> {
        self.shared.transfers.lock().await.received_files()
    }

    pub async fn pending_transfers(&self) -> usize {
        self.shared.transfers.lock().await.pending_count()
    }

    pub async fn recording_state(&self) -> RecordingState {
        self.shared.recording.lock().await.state()
    }

    pub async fn is_microphone_on(&self) -> bool {
        self.shared.controls.lock().await.is_microphone_on()
    }

    pub async fn is_camera_on(&self) -> bool {
        self.shared.controls.lock().await.is_camera_on()
    }

    pub async fn is_screen_sharing(&self) -> bool {
        self.shared.controls.lock().await.is_screen_sharing()
    }

    async fn ensure_connected(&self) -> Result<(), HuddleError> {
        match *self.shared.connection_state.lock().await {
            ConnectionState::Connected | ConnectionState::Reconnecting { .. } => Ok(()),
            _ => Err(HuddleError::NotConnected),
        }
    }
}

impl Shared {
    async fn handle(&self, event: EngineEvent) {
        match EventNormalizer::normalize(event) {
            DomainEvent::ParticipantJoined(p) => {
                let label = p.display_label().to_string();
                {
                    let mut roster = self.roster.lock().await;
                    if roster.on_join(&p.identity, p.name.as_deref()) {
                        self.emitter.emit(SessionEvent::RosterChanged(roster.entries()));
                    }
                }
                self.notice(format!("{label} joined the room")).await;
            }
            DomainEvent::ParticipantLeft(p) => {
                let label = p.display_label().to_string();
                {
                    let mut roster = self.roster.lock().await;
                    if roster.on_leave(&p.identity) {
                        self.emitter.emit(SessionEvent::RosterChanged(roster.entries()));
                    }
                }
                self.notice(format!("{label} left the room")).await;
            }
            DomainEvent::ParticipantRenamed {
                identity,
                previous_label,
                name,
            } => {
                let mut roster = self.roster.lock().await;
                if roster.on_rename(&identity, &previous_label, name.as_deref()) {
                    self.emitter.emit(SessionEvent::RosterChanged(roster.entries()));
                }
            }
            DomainEvent::TrackSubscribed(handle) => {
                let mut tracks = self.tracks.lock().await;
                if tracks.on_subscribed(handle) {
                    self.emitter.emit(SessionEvent::TracksChanged(tracks.snapshot()));
                }
            }
            DomainEvent::TrackUnsubscribed { track_id } => {
                let mut tracks = self.tracks.lock().await;
                if tracks.on_unsubscribed(&track_id) {
                    self.emitter.emit(SessionEvent::TracksChanged(tracks.snapshot()));
                }
            }
            DomainEvent::LocalTrackPublished(track) => {
                let mut controls = self.controls.lock().await;
                controls.on_local_published(&track);
                self.sync_local_tracks(&controls).await;
            }
            DomainEvent::LocalTrackUnpublished(track) => {
                let mut controls = self.controls.lock().await;
                controls.on_local_unpublished(&track);
                self.sync_local_tracks(&controls).await;
            }
            DomainEvent::LocalTrackEnded(track) => {
                let mut controls = self.controls.lock().await;
                if controls.is_screen_track(&track.id) {
                    tracing::info!("screen track {} ended, stopping share", track.id);
                    controls.stop_screen_share(self.transport.as_ref()).await;
                } else {
                    controls.on_local_unpublished(&track);
                    self.sync_local_tracks(&controls).await;
                }
            }
            DomainEvent::MessageReceived(message) => self.route(message).await,
            DomainEvent::Reconnecting => {
                let attempt = match *self.connection_state.lock().await {
                    ConnectionState::Reconnecting { attempt } => attempt + 1,
                    _ => 1,
                };
                self.set_connection_state(ConnectionState::Reconnecting { attempt })
                    .await;
            }
            DomainEvent::Reconnected => {
                self.set_connection_state(ConnectionState::Connected).await;
            }
            DomainEvent::Disconnected { reason } => {
                tracing::info!("engine disconnected: {reason}");
                if let Err(e) = self.stop_recording().await {
                    tracing::warn!("recording lost on disconnect: {e}");
                }
                self.controls.lock().await.reset();
                self.reset_room_state().await;
                self.set_connection_state(ConnectionState::Disconnected).await;
                self.notice(format!("Disconnected: {reason}")).await;
            }
        }
    }

    async fn stop_recording(&self) -> Result<Option<RecordingArtifact>, HuddleError> {
        let artifact = match self.recording.lock().await.stop_recording().await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.emitter
                    .emit(SessionEvent::RecordingStateChanged(RecordingState::Idle));
                return Err(e);
            }
        };
        self.emitter
            .emit(SessionEvent::RecordingStateChanged(RecordingState::Idle));

        if let Some(dir) = &self.recording_dir {
            let path = artifact.save_to(dir).await?;
            tracing::info!("recording written to {}", path.display());
        }
        self.emitter.emit(SessionEvent::RecordingSaved {
            file_name: artifact.file_name.clone(),
            size: artifact.data.len(),
        });
        self.notice("Recording stopped and saved.").await;
        Ok(Some(artifact))
    }

    async fn route(&self, message: DataMessage) {
        let events = {
            let mut chat = self.chat.lock().await;
            let mut transfers = self.transfers.lock().await;
            let mut inbound = Inbound {
                chat: &mut chat,
                transfers: &mut transfers,
                events: Vec::new(),
            };
            MessageRouter::dispatch(message, &mut inbound);
            inbound.events
        };
        for event in events {
            self.emitter.emit(event);
        }
    }

    async fn notice(&self, text: impl Into<String>) {
        let msg = self.chat.lock().await.notice(text);
        tracing::debug!("notice: {}", msg.text);
        self.emitter.emit(SessionEvent::ChatMessageAppended(msg));
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        *self.connection_state.lock().await = state.clone();
        self.emitter.emit(SessionEvent::ConnectionStateChanged(state));
    }

    /// Mirror the controls' camera and microphone into the registry.
    async fn sync_local_tracks(&self, controls: &LocalMediaControls) {
        let mut tracks = self.tracks.lock().await;
        let mut changed = false;

        if tracks.local_camera() != controls.camera_track() {
            changed |= match controls.camera_track() {
                Some(track) => tracks.on_local_published(track.clone()),
                None => tracks.on_local_unpublished(TrackKind::Video, TrackSource::Camera),
            };
        }
        if tracks.local_microphone() != controls.microphone_track() {
            changed |= match controls.microphone_track() {
                Some(track) => tracks.on_local_published(track.clone()),
                None => tracks.on_local_unpublished(TrackKind::Audio, TrackSource::Microphone),
            };
        }
        if changed {
            self.emitter.emit(SessionEvent::TracksChanged(tracks.snapshot()));
        }
    }

    async fn reset_room_state(&self) {
        {
            let mut roster = self.roster.lock().await;
            roster.clear();
            self.emitter.emit(SessionEvent::RosterChanged(roster.entries()));
        }
        let mut tracks = self.tracks.lock().await;
        tracks.clear();
        self.emitter.emit(SessionEvent::TracksChanged(tracks.snapshot()));
    }
}

/// Applies routed messages to chat and transfers, collecting what to emit.
struct Inbound<'a> {
    chat: &'a mut ChatLog,
    transfers: &'a mut FileTransferEngine,
    events: Vec<SessionEvent>,
}

impl Inbound<'_> {
    fn file_completed(&mut self, file: ReceivedFile) {
        let notice = self.chat.notice(received_notice(&file));
        self.events.push(SessionEvent::FileReceived(file));
        self.events.push(SessionEvent::ChatMessageAppended(notice));
    }
}

impl InboundHandler for Inbound<'_> {
    fn on_chat(&mut self, sender: &str, text: String) {
        let msg = self.chat.push(ChatMessage::new(sender, text));
        self.events.push(SessionEvent::ChatMessageAppended(msg));
    }

    fn on_file_meta(&mut self, sender: &str, meta: FileMeta) {
        if let Some(file) = self.transfers.on_meta(meta, sender.to_string()) {
            self.file_completed(file);
        }
    }

    fn on_file_chunk(&mut self, transfer_id: &str, index: Option<u32>, payload: Vec<u8>) {
        match self.transfers.on_chunk(transfer_id, index, payload) {
            ChunkOutcome::Completed(file) => self.file_completed(file),
            ChunkOutcome::Buffered { received, total } => {
                tracing::debug!("transfer {transfer_id}: {received}/{total} chunks");
            }
            ChunkOutcome::Dropped => {}
        }
    }
}
