use std::sync::Arc;

use crate::errors::HuddleError;
use crate::normalizer::DataMessage;
use crate::transport::{DataPacket, Transport};
use crate::wire::{CHAT_TOPIC, FileMeta, Topic};

/// Receives inbound messages once the router has decoded them.
pub trait InboundHandler {
    fn on_chat(&mut self, sender: &str, text: String);
    fn on_file_meta(&mut self, sender: &str, meta: FileMeta);
    fn on_file_chunk(&mut self, transfer_id: &str, index: Option<u32>, payload: Vec<u8>);
}

/// Which branch an inbound message took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Chat,
    FileMeta,
    FileChunk,
    Dropped,
}

/// Multiplexes chat and file transfer over the engine's data channel.
#[derive(Clone)]
pub struct MessageRouter {
    transport: Arc<dyn Transport>,
}

impl MessageRouter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Decode an inbound message by topic and hand it to the matching handler.
    ///
    /// Malformed file metadata and unknown topics are dropped, never surfaced.
    pub fn dispatch(message: DataMessage, handler: &mut dyn InboundHandler) -> Routed {
        let DataMessage {
            sender_label,
            topic,
            payload,
            ..
        } = message;

        match Topic::parse(topic.as_deref()) {
            Topic::Chat => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                handler.on_chat(&sender_label, text);
                Routed::Chat
            }
            Topic::FileMeta => match FileMeta::decode(&payload) {
                Ok(meta) => {
                    tracing::debug!("file meta from {sender_label}: {} ({} chunks)", meta.id, meta.total);
                    handler.on_file_meta(&sender_label, meta);
                    Routed::FileMeta
                }
                Err(e) => {
                    tracing::warn!("dropping malformed file meta from {sender_label}: {e}");
                    Routed::Dropped
                }
            },
            Topic::FileChunk { transfer_id, index } => {
                handler.on_file_chunk(transfer_id, index, payload);
                Routed::FileChunk
            }
            Topic::Other(other) => {
                tracing::debug!("ignoring data on topic {other} from {sender_label}");
                Routed::Dropped
            }
        }
    }

    /// Send one reliable message on `topic`.
    pub async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), HuddleError> {
        self.transport
            .publish_data(DataPacket {
                payload,
                topic: Some(topic.to_string()),
                reliable: true,
            })
            .await
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), HuddleError> {
        self.send(CHAT_TOPIC, text.as_bytes().to_vec()).await
    }
}
