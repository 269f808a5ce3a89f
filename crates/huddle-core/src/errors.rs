use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("device unavailable: {0}")]
    Device(String),
    #[error("not connected")]
    NotConnected,
    #[error("screen share failed: {0}")]
    ScreenShare(String),
    #[error("nothing to record")]
    NothingToRecord,
    #[error("recording error: {0}")]
    Recording(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
