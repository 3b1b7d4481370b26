//! Write pipeline
//!
//! ```text
//! validate ─► encode (JSON) ─► compress? ─► append to hour shard ─► update totals
//! ```
//!
//! Compression is applied only when requested, enabled globally, and the
//! encoded packet is larger than the threshold. A codec failure never fails
//! the write: the raw encoding is stored instead.

use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, error, warn};

use crate::compression::Compressor;
use crate::config::StorageOptions;
use crate::error::StorageError;
use crate::metrics::{self, PerformanceMetrics};
use crate::storage::context::StreamContext;
use crate::storage::layout;
use crate::storage::limiter::BatchGate;
use crate::storage::shard;
use crate::types::{BatchWriteResult, SamplePacket, WriteResult};

/// Packet bytes ready to append
#[derive(Debug)]
pub struct EncodedPacket {
    /// Bytes to store
    pub payload: Vec<u8>,

    /// Length of the JSON encoding
    pub raw_len: usize,

    /// Whether `payload` is compressed
    pub compressed: bool,
}

impl EncodedPacket {
    /// Stored over raw length, exactly 1.0 when stored raw
    pub fn compression_ratio(&self) -> f64 {
        if !self.compressed || self.raw_len == 0 {
            1.0
        } else {
            self.payload.len() as f64 / self.raw_len as f64
        }
    }
}

/// Encodes packets and appends them to shard files
pub struct WritePipeline {
    compressor: Arc<dyn Compressor>,
    compression_threshold: usize,
    compression_enabled: bool,
    metrics: Arc<PerformanceMetrics>,
}

impl WritePipeline {
    /// Create a pipeline from engine options
    pub fn new(
        options: &StorageOptions,
        compressor: Arc<dyn Compressor>,
        metrics: Arc<PerformanceMetrics>,
    ) -> Self {
        Self {
            compressor,
            compression_threshold: options.compression_threshold,
            compression_enabled: options.enable_compression,
            metrics,
        }
    }

    /// Encode a packet, compressing when allowed and worthwhile
    pub async fn encode(
        &self,
        packet: &SamplePacket,
        compress: bool,
    ) -> Result<EncodedPacket, StorageError> {
        let raw = serde_json::to_vec(packet)?;
        let raw_len = raw.len();

        if !(compress && self.compression_enabled && raw_len > self.compression_threshold) {
            return Ok(EncodedPacket {
                payload: raw,
                raw_len,
                compressed: false,
            });
        }

        let started = Instant::now();
        match self.compressor.compress(&raw).await {
            Ok(payload) => {
                self.metrics
                    .record_compression(raw_len as u64, started.elapsed());
                Ok(EncodedPacket {
                    payload,
                    raw_len,
                    compressed: true,
                })
            },
            Err(e) => {
                warn!(
                    stream_id = packet.stream_id,
                    codec = self.compressor.algorithm_id(),
                    error = %e,
                    "Compression failed, storing packet uncompressed"
                );
                metrics::record_codec_fallback("compress");
                Ok(EncodedPacket {
                    payload: raw,
                    raw_len,
                    compressed: false,
                })
            },
        }
    }

    /// Persist one packet
    ///
    /// Never fails: errors come back as a failed [`WriteResult`].
    pub async fn write(
        &self,
        ctx: &StreamContext,
        packet: &SamplePacket,
        compress: bool,
    ) -> WriteResult {
        let started = Instant::now();
        let outcome = self.try_write(ctx, packet, compress).await;
        let elapsed = started.elapsed();
        let stream_id = ctx.stream_id();

        match outcome {
            Ok((encoded, path)) => {
                let stored = encoded.payload.len() as u64;
                self.metrics.record_write(stored, elapsed, true);
                metrics::record_write(stream_id, elapsed.as_secs_f64(), true);
                metrics::record_write_bytes(encoded.raw_len as u64, stored);

                debug!(
                    stream_id,
                    sequence = packet.sequence_number,
                    raw_bytes = encoded.raw_len,
                    stored_bytes = stored,
                    path = %path.display(),
                    "Packet written"
                );

                WriteResult {
                    success: true,
                    error_message: None,
                    bytes_written: encoded.raw_len as u64,
                    compressed_size: stored,
                    compression_ratio: encoded.compression_ratio(),
                    write_time: elapsed,
                    storage_location: Some(path),
                }
            },
            Err(e) => {
                self.metrics.record_write(0, elapsed, false);
                metrics::record_write(stream_id, elapsed.as_secs_f64(), false);
                error!(stream_id, sequence = packet.sequence_number, error = %e, "Packet write failed");
                WriteResult::failed(e.to_string(), elapsed)
            },
        }
    }

    async fn try_write(
        &self,
        ctx: &StreamContext,
        packet: &SamplePacket,
        compress: bool,
    ) -> Result<(EncodedPacket, PathBuf), StorageError> {
        packet.validate()?;
        if packet.stream_id != ctx.stream_id() {
            return Err(StorageError::InvalidPacket(format!(
                "packet belongs to stream {}, not {}",
                packet.stream_id,
                ctx.stream_id()
            )));
        }

        let encoded = self.encode(packet, compress).await?;
        let path = ctx
            .storage_path()
            .join(layout::shard_file_name(&packet.timestamp));

        {
            let _guard = ctx.append_lock().lock().await;
            fs::create_dir_all(ctx.storage_path()).await?;
            let valid = shard::repair_tail(&path, ctx.known_shard_len(&path)).await?;
            let appended = shard::append_record(&path, &encoded.payload).await?;
            ctx.set_shard_len(path.clone(), valid + appended);
        }

        ctx.record_write(
            encoded.raw_len as u64,
            encoded.payload.len() as u64,
            packet.total_samples(),
            packet.channel_data.len(),
        );
        Ok((encoded, path))
    }

    /// Persist packets concurrently, bounded by `gate`
    ///
    /// Successful packets stay written when others fail.
    pub async fn write_batch(
        &self,
        ctx: &StreamContext,
        packets: &[SamplePacket],
        compress: bool,
        gate: &BatchGate,
    ) -> BatchWriteResult {
        let started = Instant::now();

        let results = join_all(packets.iter().map(|packet| async move {
            match gate.acquire().await {
                Ok(_permit) => self.write(ctx, packet, compress).await,
                Err(e) => WriteResult::failed(e.to_string(), Duration::ZERO),
            }
        }))
        .await;

        let mut batch = aggregate(packets, &results);
        batch.total_write_time = started.elapsed();
        batch
    }
}

/// Fold per-packet results into a batch result
///
/// The average ratio is capacity-weighted: `Σcompressed / Σraw` over the
/// successful packets.
pub fn aggregate(packets: &[SamplePacket], results: &[WriteResult]) -> BatchWriteResult {
    let mut batch = BatchWriteResult {
        total_packets: packets.len(),
        ..Default::default()
    };

    for (packet, result) in packets.iter().zip(results) {
        if result.success {
            batch.successful_packets += 1;
            batch.total_bytes_written += result.bytes_written;
            batch.total_compressed_size += result.compressed_size;
        } else {
            batch.failed_packets += 1;
            batch.failed_packet_errors.push(format!(
                "packet {}: {}",
                packet.sequence_number,
                result.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    batch.success = batch.failed_packets == 0;
    batch.average_compression_ratio = if batch.total_bytes_written > 0 {
        batch.total_compressed_size as f64 / batch.total_bytes_written as f64
    } else {
        0.0
    };
    batch
}
