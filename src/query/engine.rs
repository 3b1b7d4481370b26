//! Historical query and statistics over a stream's shards
//!
//! # Query Flow
//!
//! ```text
//! list shards ─► date pre-filter ─► decode records ─► packet time filter
//!      ─► expand to points ─► merge per channel ─► (LTTB) ─► series
//! ```
//!
//! Shards are read without any lock. A shard removed mid-query reads as
//! empty and the query returns fewer points.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::compression::Compressor;
use crate::error::StorageError;
use crate::query::downsample::{self, METHOD_NAME};
use crate::query::statistics::{self, ShardSummary};
use crate::storage::layout;
use crate::storage::shard::{self, ShardFile};
use crate::types::{ChannelId, ChannelSeries, ChannelStatistics, DataPoint, SamplePacket};

/// At most this many leading points feed the reported sample rate
pub const SAMPLE_RATE_WINDOW: usize = 100;

/// Packets read from the shards of a range
#[derive(Debug, Default)]
pub struct ShardScan {
    /// In-range packets, shard order then record order
    pub packets: Vec<SamplePacket>,

    /// Shards read
    pub shards_scanned: usize,

    /// On-disk size of the shards read
    pub bytes_scanned: u64,
}

/// Channel series assembled from a scan
#[derive(Debug, Default)]
pub struct AssembledSeries {
    /// Series keyed by channel
    pub channels: BTreeMap<ChannelId, ChannelSeries>,

    /// Points before downsampling
    pub total_points: usize,

    /// Points returned
    pub returned_points: usize,

    /// Downsampling method applied, if any
    pub downsampling_method: Option<String>,
}

/// Statistics over a range
#[derive(Debug, Default)]
pub struct RangeStatistics {
    /// Merged per-channel statistics
    pub channels: BTreeMap<ChannelId, ChannelStatistics>,

    /// In-range packets
    pub packets: usize,

    /// On-disk size of the shards read
    pub bytes_scanned: u64,
}

/// Reader over shard directories
pub struct QueryEngine {
    compressor: Arc<dyn Compressor>,
}

impl QueryEngine {
    /// Create a reader decoding with `compressor`
    pub fn new(compressor: Arc<dyn Compressor>) -> Self {
        Self { compressor }
    }

    /// Shards of `dir` selected by the date pre-filter
    async fn shards_in_window(
        &self,
        dir: &Path,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<ShardFile>, StorageError> {
        let shards = shard::list_shards(dir).await?;
        Ok(shards
            .into_iter()
            .filter(|s| layout::in_query_window(&s.hour, start, end))
            .collect())
    }

    /// Decode one shard, logging and skipping it on I/O failure
    async fn read_shard(&self, shard: &ShardFile) -> Vec<SamplePacket> {
        match shard::read_packets(&shard.path, self.compressor.as_ref()).await {
            Ok(packets) => packets,
            Err(e) => {
                warn!(path = %shard.path.display(), error = %e, "Failed to read shard");
                Vec::new()
            },
        }
    }

    /// Collect packets whose base timestamp lies in `[start, end]`
    pub async fn scan(
        &self,
        dir: &Path,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<ShardScan, StorageError> {
        let mut scan = ShardScan::default();

        for shard in self.shards_in_window(dir, start, end).await? {
            let packets = self.read_shard(&shard).await;
            scan.shards_scanned += 1;
            scan.bytes_scanned += shard.size;
            scan.packets.extend(
                packets
                    .into_iter()
                    .filter(|p| p.timestamp >= *start && p.timestamp <= *end),
            );
        }

        debug!(
            dir = %dir.display(),
            shards = scan.shards_scanned,
            packets = scan.packets.len(),
            "Shard scan complete"
        );
        Ok(scan)
    }

    /// Statistics per shard, merged across shards
    pub async fn statistics(
        &self,
        dir: &Path,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<RangeStatistics, StorageError> {
        let mut stats = RangeStatistics::default();

        for shard in self.shards_in_window(dir, start, end).await? {
            let packets = self.read_shard(&shard).await;
            let ShardSummary { channels, packets } =
                statistics::summarize_shard(&packets, start, end);

            stats.packets += packets;
            stats.bytes_scanned += shard.size;
            statistics::merge_into(&mut stats.channels, channels);
        }

        Ok(stats)
    }
}

/// Turn scanned packets into per-channel series
///
/// Points of the same channel from different packets are concatenated
/// without deduplication. When the total exceeds `max_points`, every
/// channel is downsampled to `max_points` with LTTB.
pub fn assemble(
    packets: &[SamplePacket],
    channels: Option<&[ChannelId]>,
    max_points: usize,
) -> AssembledSeries {
    let mut merged: BTreeMap<ChannelId, Vec<DataPoint>> = BTreeMap::new();
    for packet in packets {
        for point in packet.to_points(channels) {
            merged.entry(point.channel_id).or_default().push(point);
        }
    }

    let total_points = merged.values().map(Vec::len).sum();
    let downsample = total_points > max_points;

    let mut out = AssembledSeries {
        total_points,
        downsampling_method: downsample.then(|| METHOD_NAME.to_string()),
        ..Default::default()
    };

    for (channel_id, mut points) in merged {
        // Stable: equal timestamps keep packet order
        points.sort_by_key(|p| p.timestamp_ns);
        if downsample {
            points = downsample::lttb(&points, max_points);
        }

        out.returned_points += points.len();
        out.channels.insert(
            channel_id,
            ChannelSeries {
                channel_id,
                channel_name: format!("Channel_{}", channel_id),
                timestamps: points.iter().map(DataPoint::epoch_seconds).collect(),
                values: points.iter().map(|p| p.value).collect(),
                sample_rate: estimate_sample_rate(&points),
            },
        );
    }

    out
}

/// Reciprocal of the mean interval over the leading points
///
/// Only the first [`SAMPLE_RATE_WINDOW`] points are examined. Returns 0.0
/// for fewer than two points or a non-positive mean interval.
pub fn estimate_sample_rate(points: &[DataPoint]) -> f64 {
    let window = points.len().min(SAMPLE_RATE_WINDOW);
    if window < 2 {
        return 0.0;
    }

    let span: f64 = points[..window]
        .windows(2)
        .map(|w| (w[1].timestamp_ns - w[0].timestamp_ns) as f64 / 1e9)
        .sum();
    let mean = span / (window - 1) as f64;

    if mean > 0.0 {
        1.0 / mean
    } else {
        0.0
    }
}
