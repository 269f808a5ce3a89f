use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::HuddleError;
use crate::transport::Resolution;

/// Camera capture presets.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoPreset {
    H360,
    #[default]
    H540,
    H720,
    H1080,
}

impl VideoPreset {
    pub fn resolution(self) -> Resolution {
        let (width, height) = match self {
            Self::H360 => (640, 360),
            Self::H540 => (960, 540),
            Self::H720 => (1280, 720),
            Self::H1080 => (1920, 1080),
        };
        Resolution { width, height }
    }
}

/// Everything a session needs to know before `join`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the service that issues access tokens.
    pub application_server_url: String,
    /// Signaling URL of the real-time engine.
    pub server_url: String,
    pub room_name: String,
    pub participant_name: String,
    /// Append `-<n>` to the participant name so two tabs don't collide.
    pub randomize_identity: bool,
    pub mic_enabled_on_join: bool,
    pub camera_enabled_on_join: bool,
    pub camera_resolution: VideoPreset,
    /// Pending inbound transfers idle longer than this are dropped.
    pub transfer_stale_after_secs: u64,
    /// Where finished recordings are written. `None` keeps them in memory.
    pub recording_dir: Option<PathBuf>,
    pub record_screen_with_microphone: bool,
    pub record_screen_with_remote_audio: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application_server_url: "http://127.0.0.1:6080/".to_string(),
            server_url: "ws://127.0.0.1:7880".to_string(),
            room_name: "Test Room".to_string(),
            participant_name: "Participant".to_string(),
            randomize_identity: true,
            mic_enabled_on_join: true,
            camera_enabled_on_join: true,
            camera_resolution: VideoPreset::H540,
            transfer_stale_after_secs: 300,
            recording_dir: None,
            record_screen_with_microphone: true,
            record_screen_with_remote_audio: false,
        }
    }
}

impl SessionConfig {
    /// Read a JSON config. A missing or unreadable file gives the defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring invalid config {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), HuddleError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check both URLs parse and use a scheme the session can talk to.
    pub fn validate(&self) -> Result<(), HuddleError> {
        check_url(&self.application_server_url, &["http", "https"])?;
        check_url(&self.server_url, &["ws", "wss", "http", "https"])?;
        if self.room_name.trim().is_empty() {
            return Err(HuddleError::Config("room name is empty".to_string()));
        }
        if self.transfer_stale_after_secs == 0 {
            return Err(HuddleError::Config("transfer_stale_after_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// `<application_server_url>/token`.
    pub fn token_endpoint(&self) -> Result<Url, HuddleError> {
        let mut base = check_url(&self.application_server_url, &["http", "https"])?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join("token")
            .map_err(|e| HuddleError::InvalidUrl(e.to_string()))
    }

    /// The participant name to join with.
    pub fn identity_name(&self) -> String {
        if self.randomize_identity {
            let suffix: u32 = rand::random::<u32>() % 10_000;
            format!("{}-{suffix}", self.participant_name)
        } else {
            self.participant_name.clone()
        }
    }
}

fn check_url(raw: &str, schemes: &[&str]) -> Result<Url, HuddleError> {
    let url = Url::parse(raw).map_err(|e| HuddleError::InvalidUrl(format!("'{raw}': {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(HuddleError::InvalidUrl(format!(
            "'{raw}': unsupported scheme {}",
            url.scheme()
        )));
    }
    Ok(url)
}
