//! Data-channel wire format.
//!
//! | topic                       | payload                                  |
//! |-----------------------------|------------------------------------------|
//! | `chat` or none              | UTF-8 text                               |
//! | `file-meta`                 | JSON `{id, name, size, type, total}`     |
//! | `file-chunk:<id>[:<index>]` | raw bytes, at most [`CHUNK_SIZE`]        |
//!
//! Chunks are sent with their zero-based index after the id. Peers that read
//! only the segment after the first colon still attribute them correctly, and
//! chunks that arrive without an index are placed in arrival order.

use serde::{Deserialize, Serialize};

use crate::errors::HuddleError;

pub const CHAT_TOPIC: &str = "chat";
pub const FILE_META_TOPIC: &str = "file-meta";
pub const FILE_CHUNK_PREFIX: &str = "file-chunk:";

/// Chunk payload size, well under common reliable data-channel limits.
pub const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic<'a> {
    Chat,
    FileMeta,
    FileChunk {
        transfer_id: &'a str,
        index: Option<u32>,
    },
    Other(&'a str),
}

impl<'a> Topic<'a> {
    pub fn parse(topic: Option<&'a str>) -> Self {
        match topic {
            None | Some(CHAT_TOPIC) => Topic::Chat,
            Some(FILE_META_TOPIC) => Topic::FileMeta,
            Some(t) => match t.strip_prefix(FILE_CHUNK_PREFIX) {
                Some(rest) => {
                    let (transfer_id, index) = split_chunk_index(rest);
                    Topic::FileChunk { transfer_id, index }
                }
                None => Topic::Other(t),
            },
        }
    }
}

fn split_chunk_index(rest: &str) -> (&str, Option<u32>) {
    if let Some((id, index)) = rest.rsplit_once(':') {
        if !id.is_empty() {
            if let Ok(index) = index.parse::<u32>() {
                return (id, Some(index));
            }
        }
    }
    (rest, None)
}

pub fn chunk_topic(transfer_id: &str, index: u32) -> String {
    format!("{FILE_CHUNK_PREFIX}{transfer_id}:{index}")
}

/// Announces a transfer before its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub total: u32,
}

impl FileMeta {
    pub fn decode(payload: &[u8]) -> Result<Self, HuddleError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, HuddleError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Number of chunks needed for `len` bytes.
pub fn chunk_count(len: usize) -> u32 {
    len.div_ceil(CHUNK_SIZE) as u32
}
