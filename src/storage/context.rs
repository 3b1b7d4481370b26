//! Per-stream contexts and the stream registry
//!
//! Exactly one [`StreamContext`] exists per stream id for the lifetime of a
//! [`StreamRegistry`]. It is shared by every concurrent writer to that
//! stream and mutated in place, never replaced.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::layout;
use crate::types::StreamId;

/// Running totals of a stream
///
/// All fields move together: one successful write is one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamTotals {
    /// Encoded bytes written
    pub raw_bytes: u64,

    /// Bytes actually stored
    pub compressed_bytes: u64,

    /// Packets written
    pub packet_count: u64,

    /// Readings written across channels
    pub sample_count: u64,

    /// Completion time of the latest write to update the totals
    ///
    /// Under concurrent writers this is recent, not strictly the last to finish.
    pub last_write: Option<DateTime<Utc>>,

    /// Channels in the most recently recorded packet
    pub last_channel_count: usize,
}

impl StreamTotals {
    /// Stored over raw bytes, 0.0 before the first write
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            0.0
        } else {
            self.compressed_bytes as f64 / self.raw_bytes as f64
        }
    }
}

/// In-memory state of one stream
#[derive(Debug)]
pub struct StreamContext {
    stream_id: StreamId,
    storage_path: PathBuf,
    created_at: DateTime<Utc>,
    totals: Mutex<StreamTotals>,
    active: AtomicBool,

    /// Serializes shard appends for this stream
    append_lock: tokio::sync::Mutex<()>,

    /// Shard lengths as left by this process's last append
    shard_lengths: Mutex<HashMap<PathBuf, u64>>,
}

impl StreamContext {
    fn new(stream_id: StreamId, storage_path: PathBuf, created_at: DateTime<Utc>, active: bool) -> Self {
        Self {
            stream_id,
            storage_path,
            created_at,
            totals: Mutex::new(StreamTotals::default()),
            active: AtomicBool::new(active),
            append_lock: tokio::sync::Mutex::new(()),
            shard_lengths: Mutex::new(HashMap::new()),
        }
    }

    /// Stream identifier
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Directory holding the stream's shards
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// When this context was created (or the directory was first seen)
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the stream has been written to by this process
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Snapshot of the running totals
    pub fn totals(&self) -> StreamTotals {
        self.totals.lock().clone()
    }

    /// Lock guarding appends to this stream's shards
    pub(crate) fn append_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.append_lock
    }

    /// Length this process last left `shard` at
    ///
    /// Only meaningful while holding [`Self::append_lock`].
    pub(crate) fn known_shard_len(&self, shard: &Path) -> Option<u64> {
        self.shard_lengths.lock().get(shard).copied()
    }

    /// Remember the length of `shard` after an append
    pub(crate) fn set_shard_len(&self, shard: PathBuf, len: u64) {
        self.shard_lengths.lock().insert(shard, len);
    }

    /// Fold one successful write into the totals
    pub fn record_write(&self, raw_bytes: u64, stored_bytes: u64, samples: u64, channels: usize) {
        {
            let mut totals = self.totals.lock();
            totals.raw_bytes += raw_bytes;
            totals.compressed_bytes += stored_bytes;
            totals.packet_count += 1;
            totals.sample_count += samples;
            totals.last_write = Some(Utc::now());
            totals.last_channel_count = channels;
        }
        self.active.store(true, Ordering::Release);
    }
}

/// Owned map from stream id to context
///
/// Constructed with the engine and dropped with it.
#[derive(Debug)]
pub struct StreamRegistry {
    base_path: PathBuf,
    streams: DashMap<StreamId, Arc<StreamContext>>,
}

impl StreamRegistry {
    /// Create an empty registry rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            streams: DashMap::new(),
        }
    }

    /// Return the stream's context, creating it on first use
    ///
    /// Concurrent callers for the same id all receive the same context.
    pub fn get_or_create(&self, stream_id: StreamId) -> Arc<StreamContext> {
        self.streams
            .entry(stream_id)
            .or_insert_with(|| {
                debug!(stream_id, "Creating stream context");
                Arc::new(StreamContext::new(
                    stream_id,
                    layout::stream_dir(&self.base_path, stream_id),
                    Utc::now(),
                    true,
                ))
            })
            .clone()
    }

    /// Look up an existing context
    pub fn get(&self, stream_id: StreamId) -> Option<Arc<StreamContext>> {
        self.streams.get(&stream_id).map(|entry| entry.value().clone())
    }

    /// Registered stream ids, ascending
    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.streams.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// All registered contexts, ascending by id
    pub fn contexts(&self) -> Vec<Arc<StreamContext>> {
        let mut contexts: Vec<_> = self.streams.iter().map(|e| e.value().clone()).collect();
        contexts.sort_by_key(|c| c.stream_id());
        contexts
    }

    /// Number of registered streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no stream is registered
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Register stream directories left on disk by an earlier process
    ///
    /// Discovered streams start inactive with zero totals. Returns how many
    /// new streams were registered.
    pub async fn discover(&self) -> Result<usize, StorageError> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut found = 0;
        while let Some(entry) = entries.next_entry().await? {
            let Some(stream_id) = entry.file_name().to_str().and_then(layout::parse_stream_dir)
            else {
                continue;
            };

            let meta = entry.metadata().await?;
            if !meta.is_dir() || self.streams.contains_key(&stream_id) {
                continue;
            }

            let created_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let inserted = {
                let mut inserted = false;
                self.streams.entry(stream_id).or_insert_with(|| {
                    inserted = true;
                    Arc::new(StreamContext::new(stream_id, entry.path(), created_at, false))
                });
                inserted
            };
            if inserted {
                found += 1;
            }
        }

        debug!(found, base_path = %self.base_path.display(), "Stream discovery complete");
        Ok(found)
    }
}
