//! Storage engine facade
//!
//! Owns the stream registry, write gates, write pipeline, shard reader and
//! performance register. Every public operation returns a result struct;
//! only [`StorageEngine::statistics`] returns an error, for unknown streams
//! and invalid ranges.
//!
//! # Example
//!
//! ```rust,no_run
//! use acq_store::{SamplePacket, StorageEngine, StorageOptions};
//! use chrono::Utc;
//!
//! # async fn example() -> acq_store::Result<()> {
//! let engine = StorageEngine::open_default(StorageOptions::with_base_path("/tmp/acq")).await?;
//!
//! let now = Utc::now();
//! let packet = SamplePacket::new(7, now, 1000.0).with_channel(0, vec![0.1, 0.2, 0.3]);
//! let written = engine.write(7, &packet, true).await;
//! assert!(written.success);
//!
//! let result = engine.query(7, now, now, None, 10_000).await;
//! assert_eq!(result.total_points, 3);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{error, info, warn};

use crate::compression::{Compressor, SnappyCompressor};
use crate::config::StorageOptions;
use crate::error::{Error, Result, StorageError};
use crate::metrics::{self, PerformanceMetrics, PerformanceSnapshot};
use crate::query::engine::{self as query_engine, QueryEngine};
use crate::services::{RetentionSweeper, ServiceHandle};
use crate::storage::context::{StreamContext, StreamRegistry};
use crate::storage::layout;
use crate::storage::limiter::WriteLimiter;
use crate::storage::shard;
use crate::storage::writer::WritePipeline;
use crate::types::{
    BatchWriteResult, ChannelId, DataDeleteResult, DataStatistics, HistoricalDataResult,
    SamplePacket, StorageOptimizationResult, StorageStatus, StreamId, StreamStorageInfo,
    WriteResult,
};

/// Small shards are reported only above this count
pub const SMALL_SHARD_REPORT_THRESHOLD: usize = 5;

/// Message of an optimize call rejected by the reentrancy guard
pub const OPTIMIZATION_IN_PROGRESS: &str = "optimization already in progress";

/// Shards removed by one deletion pass
#[derive(Debug, Default, Clone, Copy)]
struct Removal {
    files: usize,
    bytes: u64,
}

/// Releases the optimize guard on drop
struct OptimizeGuard<'a>(&'a AtomicBool);

impl Drop for OptimizeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Time-sharded storage engine for acquisition streams
pub struct StorageEngine {
    options: StorageOptions,
    registry: StreamRegistry,
    limiter: WriteLimiter,
    writer: WritePipeline,
    reader: QueryEngine,
    metrics: Arc<PerformanceMetrics>,
    optimizing: AtomicBool,
}

impl StorageEngine {
    /// Open an engine with the given codec
    ///
    /// Validates the options, creates the base directory and registers the
    /// streams already on disk.
    pub async fn open(options: StorageOptions, compressor: Arc<dyn Compressor>) -> Result<Self> {
        options.validate().map_err(Error::Configuration)?;
        fs::create_dir_all(&options.base_path).await?;

        let metrics = Arc::new(PerformanceMetrics::new());
        let engine = Self {
            registry: StreamRegistry::new(options.base_path.clone()),
            limiter: WriteLimiter::new(
                options.max_concurrent_writes,
                options.batch_write_concurrency,
            ),
            writer: WritePipeline::new(&options, Arc::clone(&compressor), Arc::clone(&metrics)),
            reader: QueryEngine::new(compressor),
            metrics,
            optimizing: AtomicBool::new(false),
            options,
        };

        let discovered = engine.registry.discover().await?;
        metrics::update_streams(engine.registry.len());
        info!(
            base_path = %engine.options.base_path.display(),
            discovered,
            "Storage engine opened"
        );
        Ok(engine)
    }

    /// Open an engine with the framed Snappy codec
    pub async fn open_default(options: StorageOptions) -> Result<Self> {
        Self::open(options, Arc::new(SnappyCompressor::new())).await
    }

    /// Options the engine was opened with
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Registered stream ids, ascending
    pub fn list_streams(&self) -> Vec<StreamId> {
        self.registry.ids()
    }

    /// Context of a registered stream
    pub fn stream(&self, stream_id: StreamId) -> Option<Arc<StreamContext>> {
        self.registry.get(stream_id)
    }

    /// Snapshot of the performance register
    pub fn performance(&self) -> PerformanceSnapshot {
        self.metrics.snapshot()
    }

    /// Reject further writes; in-flight writes finish
    pub fn close(&self) {
        self.limiter.close();
        info!("Storage engine closed for writes");
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write one packet to a stream, creating the stream on first use
    pub async fn write(&self, stream_id: StreamId, packet: &SamplePacket, compress: bool) -> WriteResult {
        let started = Instant::now();
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => return WriteResult::failed(e.to_string(), started.elapsed()),
        };

        let ctx = self.stream_for_write(stream_id);
        let mut result = self.writer.write(&ctx, packet, compress).await;
        result.write_time = started.elapsed();
        result
    }

    /// Write packets concurrently
    ///
    /// Holds one outer permit for the whole batch; packets share a fresh
    /// batch gate. Successful packets are not rolled back when others fail.
    pub async fn write_batch(
        &self,
        stream_id: StreamId,
        packets: &[SamplePacket],
        compress: bool,
    ) -> BatchWriteResult {
        let started = Instant::now();
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return BatchWriteResult {
                    success: false,
                    error_message: Some(e.to_string()),
                    total_packets: packets.len(),
                    total_write_time: started.elapsed(),
                    ..Default::default()
                }
            },
        };

        let ctx = self.stream_for_write(stream_id);
        let gate = self.limiter.batch_gate();
        let mut result = self.writer.write_batch(&ctx, packets, compress, &gate).await;
        result.total_write_time = started.elapsed();
        metrics::record_batch(result.total_write_time.as_secs_f64());

        info!(
            stream_id,
            successful = result.successful_packets,
            total = result.total_packets,
            elapsed_ms = result.total_write_time.as_millis() as u64,
            "Batch write complete"
        );
        result
    }

    fn stream_for_write(&self, stream_id: StreamId) -> Arc<StreamContext> {
        let known = self.registry.len();
        let ctx = self.registry.get_or_create(stream_id);
        if self.registry.len() != known {
            metrics::update_streams(self.registry.len());
        }
        ctx
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Query a stream's readings in `[start, end]`
    ///
    /// `channels = None` selects every channel. When the matched point count
    /// exceeds `max_points`, each channel is downsampled to `max_points`.
    pub async fn query(
        &self,
        stream_id: StreamId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        channels: Option<&[ChannelId]>,
        max_points: usize,
    ) -> HistoricalDataResult {
        let started = Instant::now();

        let Some(ctx) = self.registry.get(stream_id) else {
            return HistoricalDataResult::failed(
                stream_id,
                start,
                end,
                StorageError::StreamNotFound(stream_id).to_string(),
            );
        };
        if start > end {
            return HistoricalDataResult::failed(stream_id, start, end, invalid_range(&start, &end).to_string());
        }

        let scan = match self.reader.scan(ctx.storage_path(), &start, &end).await {
            Ok(scan) => scan,
            Err(e) => {
                let elapsed = started.elapsed();
                self.metrics.record_read(0, elapsed, false);
                metrics::record_read("query", elapsed.as_secs_f64(), false);
                error!(stream_id, error = %e, "Historical query failed");

                let mut failed = HistoricalDataResult::failed(stream_id, start, end, e.to_string());
                failed.query_time = elapsed;
                return failed;
            },
        };

        let series = query_engine::assemble(&scan.packets, channels, max_points);
        let mut result = HistoricalDataResult::new(stream_id, start, end);
        result.total_points = series.total_points;
        result.returned_points = series.returned_points;
        result.is_downsampled = series.downsampling_method.is_some();
        result.downsampling_method = series.downsampling_method;
        result.channels = series.channels;
        result.query_time = started.elapsed();

        self.metrics
            .record_read(scan.bytes_scanned, result.query_time, true);
        metrics::record_read("query", result.query_time.as_secs_f64(), true);
        info!(
            stream_id,
            returned_points = result.returned_points,
            total_points = result.total_points,
            downsampled = result.is_downsampled,
            elapsed_ms = result.query_time.as_millis() as u64,
            "Historical query complete"
        );
        result
    }

    /// Per-channel statistics of a stream over `[start, end]`
    pub async fn statistics(
        &self,
        stream_id: StreamId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> std::result::Result<DataStatistics, StorageError> {
        let started = Instant::now();
        let ctx = self
            .registry
            .get(stream_id)
            .ok_or(StorageError::StreamNotFound(stream_id))?;
        if start > end {
            return Err(invalid_range(&start, &end));
        }

        let range = match self.reader.statistics(ctx.storage_path(), &start, &end).await {
            Ok(range) => range,
            Err(e) => {
                metrics::record_read("statistics", started.elapsed().as_secs_f64(), false);
                error!(stream_id, error = %e, "Statistics failed");
                return Err(e);
            },
        };
        metrics::record_read("statistics", started.elapsed().as_secs_f64(), true);

        let totals = ctx.totals();
        Ok(DataStatistics {
            stream_id,
            start_time: start,
            end_time: end,
            duration: (end - start).to_std().unwrap_or(Duration::ZERO),
            total_samples: range.channels.values().map(|c| c.sample_count).sum(),
            total_bytes: range.bytes_scanned,
            compressed_bytes: totals.compressed_bytes,
            compression_ratio: totals.compression_ratio(),
            channel_stats: range.channels,
            data_packets: range.packets,
        })
    }

    // ========================================================================
    // Deletion and retention
    // ========================================================================

    /// Hard-delete a stream's shards whose hour precedes `before`
    pub async fn delete(&self, stream_id: StreamId, before: DateTime<Utc>) -> DataDeleteResult {
        let started = Instant::now();
        let mut result = DataDeleteResult {
            success: false,
            error_message: None,
            stream_id,
            deleted_before: before,
            deleted_files: 0,
            deleted_bytes: 0,
            delete_time: Duration::ZERO,
        };

        let Some(ctx) = self.registry.get(stream_id) else {
            result.error_message = Some(StorageError::StreamNotFound(stream_id).to_string());
            return result;
        };

        let mut removal = Removal::default();
        match remove_shards_before(ctx.storage_path(), &before, &mut removal).await {
            Ok(()) => {
                result.success = true;
                info!(
                    stream_id,
                    deleted_files = removal.files,
                    deleted_bytes = removal.bytes,
                    before = %before,
                    "Shards deleted"
                );
            },
            Err(e) => {
                error!(stream_id, error = %e, "Shard deletion failed");
                result.error_message = Some(e.to_string());
            },
        }

        metrics::record_deleted("delete", removal.bytes);
        result.deleted_files = removal.files;
        result.deleted_bytes = removal.bytes;
        result.delete_time = started.elapsed();
        result
    }

    /// Run one retention/optimization pass
    ///
    /// `None` sweeps every registered stream. A failure on one stream is
    /// recorded as an action and the pass continues. Overlapping calls are
    /// rejected.
    pub async fn optimize(&self, stream_id: Option<StreamId>) -> StorageOptimizationResult {
        let started = Instant::now();
        let mut result = StorageOptimizationResult {
            stream_id,
            ..Default::default()
        };

        if self
            .optimizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Optimization requested while another pass is running");
            result.error_message = Some(OPTIMIZATION_IN_PROGRESS.to_string());
            return result;
        }
        let _guard = OptimizeGuard(&self.optimizing);

        let targets = match stream_id {
            Some(id) => match self.registry.get(id) {
                Some(ctx) => vec![ctx],
                None => {
                    result.error_message = Some(StorageError::StreamNotFound(id).to_string());
                    result.optimization_time = started.elapsed();
                    metrics::record_sweep(false);
                    return result;
                },
            },
            None => self.registry.contexts(),
        };

        for ctx in targets {
            if let Err(e) = self.optimize_stream(&ctx, &mut result).await {
                error!(stream_id = ctx.stream_id(), error = %e, "Stream optimization failed");
                result
                    .optimization_actions
                    .push(format!("Stream {}: optimization failed: {}", ctx.stream_id(), e));
            }
        }

        result.success = true;
        result.optimization_time = started.elapsed();
        metrics::record_sweep(true);
        metrics::record_deleted("retention", result.bytes_freed);
        info!(
            actions = result.optimization_actions.len(),
            bytes_freed = result.bytes_freed,
            elapsed_ms = result.optimization_time.as_millis() as u64,
            "Storage optimization complete"
        );
        result
    }

    async fn optimize_stream(
        &self,
        ctx: &StreamContext,
        result: &mut StorageOptimizationResult,
    ) -> std::result::Result<(), StorageError> {
        let id = ctx.stream_id();
        let shards = shard::list_shards(ctx.storage_path()).await?;

        let small_limit = self.options.small_file_size_bytes();
        let small = shards.iter().filter(|s| s.size < small_limit).count();
        if small > SMALL_SHARD_REPORT_THRESHOLD {
            result.optimization_actions.push(format!(
                "Stream {}: {} small shard files are merge candidates",
                id, small
            ));
        }

        let cutoff = if self.options.enable_auto_cleanup {
            retention_cutoff(self.options.data_retention_days)
        } else {
            None
        };
        if let Some(cutoff) = &cutoff {
            let mut removal = Removal::default();
            let outcome = remove_shards_before(ctx.storage_path(), cutoff, &mut removal).await;
            if removal.files > 0 {
                result.bytes_freed += removal.bytes;
                result.optimization_actions.push(format!(
                    "Stream {}: deleted {} expired shard files ({} bytes)",
                    id, removal.files, removal.bytes
                ));
            }
            outcome?;
        }

        let large_limit = self.options.max_file_size_bytes();
        let large = shards
            .iter()
            .filter(|s| !cutoff.is_some_and(|c| layout::is_before(&s.hour, &c)))
            .filter(|s| s.size > large_limit)
            .count();
        if large > 0 {
            result.optimization_actions.push(format!(
                "Stream {}: {} large shard files are recompression candidates",
                id, large
            ));
        }

        Ok(())
    }

    // ========================================================================
    // Status and lifecycle
    // ========================================================================

    /// Snapshot of capacity, streams and performance
    pub async fn status(&self) -> StorageStatus {
        let base = &self.options.base_path;
        let (total_capacity, available_space) = match (fs2::total_space(base), fs2::available_space(base)) {
            (Ok(total), Ok(available)) => (total, available),
            (Err(e), _) | (_, Err(e)) => {
                warn!(path = %base.display(), error = %e, "Failed to read disk capacity");
                (0, 0)
            },
        };
        let used_space = total_capacity.saturating_sub(available_space);
        metrics::update_disk(used_space, available_space);

        let mut stream_info = BTreeMap::new();
        for ctx in self.registry.contexts() {
            stream_info.insert(ctx.stream_id(), stream_info_of(&ctx).await);
        }

        let written: Vec<f64> = stream_info
            .values()
            .filter(|info| info.packet_count > 0)
            .map(|info| info.compression_ratio)
            .collect();
        let average_compression_ratio = if written.is_empty() {
            0.0
        } else {
            written.iter().sum::<f64>() / written.len() as f64
        };

        StorageStatus {
            total_capacity,
            used_space,
            available_space,
            usage_percentage: if total_capacity > 0 {
                used_space as f64 / total_capacity as f64 * 100.0
            } else {
                0.0
            },
            active_streams: stream_info.len(),
            total_samples: stream_info.values().map(|i| i.total_samples).sum(),
            total_bytes: stream_info.values().map(|i| i.total_bytes).sum(),
            average_compression_ratio,
            stream_info,
            performance: self.metrics.snapshot(),
        }
    }

    /// Spawn the periodic retention sweeper
    ///
    /// The first pass runs one optimization interval after this call.
    pub fn start_background(self: &Arc<Self>) -> ServiceHandle {
        let sweeper = RetentionSweeper::new(Arc::clone(self), self.options.optimization_interval());
        ServiceHandle::spawn(Arc::new(sweeper))
    }
}

/// Oldest hour kept by retention, `None` when the window reaches past the
/// earliest representable time
fn retention_cutoff(retention_days: u32) -> Option<DateTime<Utc>> {
    Utc::now().checked_sub_signed(ChronoDuration::days(i64::from(retention_days)))
}

fn invalid_range(start: &DateTime<Utc>, end: &DateTime<Utc>) -> StorageError {
    StorageError::InvalidTimeRange {
        start: start.to_rfc3339(),
        end: end.to_rfc3339(),
    }
}

/// Remove shards whose hour precedes `cutoff`, accumulating into `removal`
///
/// Sizes are taken before removal. A shard that vanished meanwhile is skipped.
async fn remove_shards_before(
    dir: &Path,
    cutoff: &DateTime<Utc>,
    removal: &mut Removal,
) -> std::result::Result<(), StorageError> {
    for shard in shard::list_shards(dir).await? {
        if !layout::is_before(&shard.hour, cutoff) {
            continue;
        }
        match fs::remove_file(&shard.path).await {
            Ok(()) => {
                removal.files += 1;
                removal.bytes += shard.size;
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn stream_info_of(ctx: &StreamContext) -> StreamStorageInfo {
    let shards = match shard::list_shards(ctx.storage_path()).await {
        Ok(shards) => shards,
        Err(e) => {
            warn!(stream_id = ctx.stream_id(), error = %e, "Failed to list shards");
            Vec::new()
        },
    };
    let totals = ctx.totals();

    StreamStorageInfo {
        stream_id: ctx.stream_id(),
        stream_name: format!("Stream_{}", ctx.stream_id()),
        start_time: ctx.created_at(),
        last_write_time: totals.last_write,
        is_active: ctx.is_active(),
        total_samples: totals.sample_count,
        total_bytes: shards.iter().map(|s| s.size).sum(),
        compressed_bytes: totals.compressed_bytes,
        compression_ratio: totals.compression_ratio(),
        packet_count: totals.packet_count,
        channel_count: totals.last_channel_count,
        shard_count: shards.len(),
    }
}
