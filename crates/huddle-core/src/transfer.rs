//! Chunked file transfer over the data channel.
//!
//! Sending reads the whole file, announces it with one `file-meta` message and
//! streams fixed-size chunks after it. Receiving buffers chunks per transfer id
//! until the declared count is reached, then materializes a [`ReceivedFile`].
//! There are no acknowledgements: a sender that fails midway leaves receivers
//! with an incomplete transfer until it is pruned.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::HuddleError;
use crate::router::MessageRouter;
use crate::wire::{self, CHUNK_SIZE, FILE_META_TOPIC, FileMeta};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A file picked for sending, fully read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    pub async fn from_path(path: &Path, mime_type: Option<&str>) -> Result<Self, HuddleError> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(name, mime_type.unwrap_or_default(), data))
    }
}

/// A completed inbound transfer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub id: String,
    pub sender: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data: Arc<Vec<u8>>,
}

impl ReceivedFile {
    /// Write the file into `dir` under its declared name, stripped of any path.
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf, HuddleError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(self.safe_file_name());
        tokio::fs::write(&path, self.data.as_slice()).await?;
        Ok(path)
    }

    fn safe_file_name(&self) -> String {
        Path::new(&self.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty() && n != "..")
            .unwrap_or_else(|| format!("{}.bin", self.id))
    }
}

pub fn received_notice(file: &ReceivedFile) -> String {
    format!("Received file: {} ({} KB)", file.name, kib(file.size))
}

pub fn sent_notice(meta: &FileMeta) -> String {
    format!("Sent file: {} ({} KB)", meta.name, kib(meta.size))
}

fn kib(bytes: u64) -> u64 {
    (bytes as f64 / 1024.0).round() as u64
}

/// What happened to one inbound chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// No matching transfer, duplicate, or index out of range.
    Dropped,
    Buffered { received: u32, total: u32 },
    Completed(ReceivedFile),
}

#[derive(Debug)]
struct Transfer {
    meta: FileMeta,
    sender: String,
    chunks: BTreeMap<u32, Vec<u8>>,
    last_activity: Instant,
}

impl Transfer {
    fn received(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Index for a chunk that carries none: the first slot not filled yet.
    fn next_free_index(&self) -> u32 {
        (0..self.meta.total)
            .find(|i| !self.chunks.contains_key(i))
            .unwrap_or(self.meta.total)
    }

    fn into_received(self) -> ReceivedFile {
        let mut data = Vec::with_capacity(self.chunks.values().map(Vec::len).sum());
        for chunk in self.chunks.into_values() {
            data.extend_from_slice(&chunk);
        }
        if data.len() as u64 != self.meta.size {
            tracing::warn!(
                "transfer {} assembled {} bytes, {} declared",
                self.meta.id,
                data.len(),
                self.meta.size
            );
        }
        let mime_type = if self.meta.mime_type.is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            self.meta.mime_type
        };
        ReceivedFile {
            id: self.meta.id,
            sender: self.sender,
            name: self.meta.name,
            size: self.meta.size,
            mime_type,
            data: Arc::new(data),
        }
    }
}

/// Pending inbound transfers plus the files completed so far.
#[derive(Debug, Default)]
pub struct FileTransferEngine {
    pending: HashMap<String, Transfer>,
    received: Arc<Vec<ReceivedFile>>,
}

impl FileTransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a file into its meta message and ordered chunk payloads.
    pub fn prepare(file: &OutgoingFile, transfer_id: String) -> (FileMeta, Vec<&[u8]>) {
        let chunks: Vec<&[u8]> = file.data.chunks(CHUNK_SIZE).collect();
        let meta = FileMeta {
            id: transfer_id,
            name: file.name.clone(),
            size: file.data.len() as u64,
            mime_type: file.mime_type.clone(),
            total: wire::chunk_count(file.data.len()),
        };
        (meta, chunks)
    }

    /// Send a file: one meta message, then every chunk in order, all reliable.
    ///
    /// Aborts on the first failed send; chunks already on the wire stay there.
    pub async fn send(router: &MessageRouter, file: &OutgoingFile) -> Result<FileMeta, HuddleError> {
        let transfer_id = uuid::Uuid::new_v4().to_string();
        let (meta, chunks) = Self::prepare(file, transfer_id);

        tracing::info!(
            "sending file {} ({} bytes) as transfer {} in {} chunks",
            meta.name,
            meta.size,
            meta.id,
            meta.total
        );
        router.send(FILE_META_TOPIC, meta.encode()?).await?;
        for (index, chunk) in chunks.into_iter().enumerate() {
            router
                .send(&wire::chunk_topic(&meta.id, index as u32), chunk.to_vec())
                .await?;
        }
        Ok(meta)
    }

    /// Start (or restart) a transfer. An empty file completes immediately.
    ///
    /// A meta whose chunk count does not match its size is ignored and
    /// leaves any transfer already pending under that id untouched.
    pub fn on_meta(&mut self, meta: FileMeta, sender: String) -> Option<ReceivedFile> {
        let expected = meta.size.div_ceil(CHUNK_SIZE as u64);
        if u64::from(meta.total) != expected {
            tracing::warn!(
                "ignoring meta for transfer {}: {} chunks declared for {} bytes, expected {expected}",
                meta.id,
                meta.total,
                meta.size
            );
            return None;
        }
        let id = meta.id.clone();
        if self.pending.contains_key(&id) {
            tracing::warn!("transfer {id} announced again, discarding buffered chunks");
        }
        let transfer = Transfer {
            meta,
            sender,
            chunks: BTreeMap::new(),
            last_activity: Instant::now(),
        };
        if transfer.meta.total == 0 {
            self.pending.remove(&id);
            return Some(self.complete(transfer));
        }
        self.pending.insert(id, transfer);
        None
    }

    pub fn on_chunk(&mut self, transfer_id: &str, index: Option<u32>, payload: Vec<u8>) -> ChunkOutcome {
        let Some(transfer) = self.pending.get_mut(transfer_id) else {
            tracing::debug!("chunk for unknown transfer {transfer_id} dropped");
            return ChunkOutcome::Dropped;
        };

        let index = index.unwrap_or_else(|| transfer.next_free_index());
        if index >= transfer.meta.total {
            tracing::warn!(
                "chunk {index} out of range for transfer {transfer_id} ({} total)",
                transfer.meta.total
            );
            return ChunkOutcome::Dropped;
        }
        if transfer.chunks.contains_key(&index) {
            tracing::debug!("duplicate chunk {index} for transfer {transfer_id} dropped");
            return ChunkOutcome::Dropped;
        }

        transfer.chunks.insert(index, payload);
        transfer.last_activity = Instant::now();

        let received = transfer.received();
        let total = transfer.meta.total;
        if received < total {
            return ChunkOutcome::Buffered { received, total };
        }

        match self.pending.remove(transfer_id) {
            Some(transfer) => ChunkOutcome::Completed(self.complete(transfer)),
            None => ChunkOutcome::Dropped,
        }
    }

    /// Forget transfers that have not progressed for `max_idle`.
    pub fn prune_stale(&mut self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, t)| now.duration_since(t.last_activity) >= max_idle)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(t) = self.pending.remove(id) {
                tracing::warn!(
                    "pruned stale transfer {id} ({}/{} chunks)",
                    t.received(),
                    t.meta.total
                );
            }
        }
        stale
    }

    pub fn is_pending(&self, transfer_id: &str) -> bool {
        self.pending.contains_key(transfer_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// `(received, total)` for a pending transfer.
    pub fn progress(&self, transfer_id: &str) -> Option<(u32, u32)> {
        self.pending
            .get(transfer_id)
            .map(|t| (t.received(), t.meta.total))
    }

    pub fn received_files(&self) -> Arc<Vec<ReceivedFile>> {
        self.received.clone()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.received = Arc::new(Vec::new());
    }

    fn complete(&mut self, transfer: Transfer) -> ReceivedFile {
        let file = transfer.into_received();
        tracing::info!(
            "transfer {} complete: {} ({} bytes) from {}",
            file.id,
            file.name,
            file.data.len(),
            file.sender
        );
        let mut next = self.received.as_ref().clone();
        next.push(file.clone());
        self.received = Arc::new(next);
        file
    }
}
