//! Core data types used throughout the storage engine
//!
//! # Key Types
//!
//! - **`SamplePacket`**: one multi-channel acquisition burst, the unit of persistence
//! - **`DataPoint`**: a single (timestamp, value, channel) reading expanded from a packet
//! - **`StreamId`** / **`ChannelId`**: integer identifiers
//! - Result types returned by every public storage operation
//!
//! # Example
//!
//! ```rust
//! use acq_store::types::SamplePacket;
//! use chrono::{TimeZone, Utc};
//!
//! let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
//! let packet = SamplePacket::new(7, ts, 1000.0)
//!     .with_channel(0, vec![0.1, 0.2, 0.3])
//!     .with_channel(1, vec![1.0, 1.1, 1.2]);
//!
//! assert_eq!(packet.sample_count, 3);
//! assert_eq!(packet.to_points(None).len(), 6);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StorageError;
use crate::metrics::PerformanceSnapshot;

/// Identifier of an independently managed time series
pub type StreamId = u32;

/// Identifier of one acquisition channel inside a packet
pub type ChannelId = u32;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Convert a wall-clock timestamp to nanoseconds since the Unix epoch
///
/// Returns `None` outside the representable range (roughly 1677..2262).
pub fn to_nanos(ts: &DateTime<Utc>) -> Option<i64> {
    ts.timestamp_nanos_opt()
}

/// Convert nanoseconds since the Unix epoch back to a wall-clock timestamp
pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

// ============================================================================
// Packets and points
// ============================================================================

/// One acquisition burst submitted in a single write call
///
/// Channel arrays are dense and chronological; sample `i` of every channel
/// was taken at `timestamp + i / sample_rate` seconds. A `BTreeMap` keeps the
/// encoded form canonical regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePacket {
    /// Stream this packet belongs to
    pub stream_id: StreamId,

    /// Wall-clock time of the first sample
    pub timestamp: DateTime<Utc>,

    /// Monotonically increasing sequence number assigned by the producer
    pub sequence_number: u64,

    /// Samples per second
    pub sample_rate: f64,

    /// Samples per channel
    pub sample_count: u32,

    /// Readings keyed by channel
    pub channel_data: BTreeMap<ChannelId, Vec<f64>>,
}

impl SamplePacket {
    /// Create an empty packet
    pub fn new(stream_id: StreamId, timestamp: DateTime<Utc>, sample_rate: f64) -> Self {
        Self {
            stream_id,
            timestamp,
            sequence_number: 0,
            sample_rate,
            sample_count: 0,
            channel_data: BTreeMap::new(),
        }
    }

    /// Set the sequence number
    pub fn with_sequence(mut self, sequence_number: u64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    /// Add one channel's readings
    ///
    /// `sample_count` tracks the longest channel.
    pub fn with_channel(mut self, channel: ChannelId, values: Vec<f64>) -> Self {
        self.sample_count = self.sample_count.max(values.len() as u32);
        self.channel_data.insert(channel, values);
        self
    }

    /// Total readings across all channels
    pub fn total_samples(&self) -> u64 {
        self.channel_data.values().map(|v| v.len() as u64).sum()
    }

    /// Check that the packet can be stored and expanded into points
    pub fn validate(&self) -> Result<(), StorageError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(StorageError::InvalidPacket(format!(
                "sample rate must be finite and positive, got {}",
                self.sample_rate
            )));
        }
        if to_nanos(&self.timestamp).is_none() {
            return Err(StorageError::InvalidPacket(format!(
                "timestamp {} is outside the nanosecond range",
                self.timestamp
            )));
        }
        // JSON has no encoding for NaN or infinities
        for (channel, values) in &self.channel_data {
            if let Some(index) = values.iter().position(|v| !v.is_finite()) {
                return Err(StorageError::InvalidPacket(format!(
                    "channel {} sample {} is not finite ({})",
                    channel, index, values[index]
                )));
            }
        }
        Ok(())
    }

    /// Absolute timestamp of sample `index` in nanoseconds
    fn sample_nanos(&self, base: i64, index: usize) -> i64 {
        let offset = (index as f64 / self.sample_rate * NANOS_PER_SECOND).round() as i64;
        base.saturating_add(offset)
    }

    /// Expand into data points, optionally restricted to a channel set
    ///
    /// `None` means all channels. Points are grouped by channel in ascending
    /// channel order, each group chronological.
    pub fn to_points(&self, channels: Option<&[ChannelId]>) -> Vec<DataPoint> {
        let Some(base) = to_nanos(&self.timestamp) else {
            return Vec::new();
        };

        let mut points = Vec::new();
        for (&channel_id, values) in &self.channel_data {
            if let Some(filter) = channels {
                if !filter.contains(&channel_id) {
                    continue;
                }
            }
            points.reserve(values.len());
            for (i, &value) in values.iter().enumerate() {
                points.push(DataPoint {
                    timestamp_ns: self.sample_nanos(base, i),
                    value,
                    channel_id,
                });
            }
        }
        points
    }
}

/// A single reading, derived from a packet at query time
///
/// Never persisted directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    /// Nanoseconds since the Unix epoch
    pub timestamp_ns: i64,

    /// Reading
    pub value: f64,

    /// Channel the reading came from
    pub channel_id: ChannelId,
}

impl DataPoint {
    /// Create a data point
    pub fn new(timestamp_ns: i64, value: f64, channel_id: ChannelId) -> Self {
        Self {
            timestamp_ns,
            value,
            channel_id,
        }
    }

    /// Timestamp as fractional seconds since the Unix epoch
    pub fn epoch_seconds(&self) -> f64 {
        self.timestamp_ns as f64 / NANOS_PER_SECOND
    }

    /// Timestamp as a wall-clock time
    pub fn timestamp(&self) -> DateTime<Utc> {
        from_nanos(self.timestamp_ns)
    }
}

// ============================================================================
// Write results
// ============================================================================

/// Outcome of a single packet write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteResult {
    /// Whether the packet was persisted
    pub success: bool,

    /// Failure description
    pub error_message: Option<String>,

    /// Encoded (uncompressed) size in bytes
    pub bytes_written: u64,

    /// Size actually appended to the shard, excluding the record header
    pub compressed_size: u64,

    /// `compressed_size / bytes_written`, 1.0 when stored raw
    pub compression_ratio: f64,

    /// Time spent in the write pipeline
    pub write_time: Duration,

    /// Shard file the packet was appended to
    pub storage_location: Option<PathBuf>,
}

impl WriteResult {
    /// Build a failed result
    pub fn failed(message: impl Into<String>, write_time: Duration) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            write_time,
            ..Default::default()
        }
    }
}

/// Aggregated outcome of a batch write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchWriteResult {
    /// True only if every packet succeeded
    pub success: bool,

    /// Failure of the batch as a whole (not of individual packets)
    pub error_message: Option<String>,

    /// Packets submitted
    pub total_packets: usize,

    /// Packets persisted
    pub successful_packets: usize,

    /// Packets that failed
    pub failed_packets: usize,

    /// Sum of encoded sizes over successful packets
    pub total_bytes_written: u64,

    /// Sum of stored sizes over successful packets
    pub total_compressed_size: u64,

    /// `total_compressed_size / total_bytes_written` (capacity-weighted)
    pub average_compression_ratio: f64,

    /// Wall time of the whole batch
    pub total_write_time: Duration,

    /// One message per failed packet
    pub failed_packet_errors: Vec<String>,
}

// ============================================================================
// Query results
// ============================================================================

/// One channel's series in a query result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSeries {
    /// Channel identifier
    pub channel_id: ChannelId,

    /// Display name (`Channel_<id>`)
    pub channel_name: String,

    /// Seconds since the Unix epoch, ascending
    pub timestamps: Vec<f64>,

    /// Readings aligned with `timestamps`
    pub values: Vec<f64>,

    /// Estimated from at most the first 100 points; informational only
    pub sample_rate: f64,
}

/// Result of a historical query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalDataResult {
    /// Whether the query ran
    pub success: bool,

    /// Failure description
    pub error_message: Option<String>,

    /// Stream queried
    pub stream_id: StreamId,

    /// Requested range start
    pub start_time: DateTime<Utc>,

    /// Requested range end
    pub end_time: DateTime<Utc>,

    /// Series keyed by channel
    pub channels: BTreeMap<ChannelId, ChannelSeries>,

    /// Points matched before downsampling
    pub total_points: usize,

    /// Points returned
    pub returned_points: usize,

    /// Whether LTTB was applied
    pub is_downsampled: bool,

    /// Downsampling algorithm name
    pub downsampling_method: Option<String>,

    /// Time spent answering
    pub query_time: Duration,
}

impl HistoricalDataResult {
    /// Empty successful result for a range
    pub fn new(stream_id: StreamId, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            success: true,
            error_message: None,
            stream_id,
            start_time,
            end_time,
            channels: BTreeMap::new(),
            total_points: 0,
            returned_points: 0,
            is_downsampled: false,
            downsampling_method: None,
            query_time: Duration::ZERO,
        }
    }

    /// Failed result for a range
    pub fn failed(
        stream_id: StreamId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::new(stream_id, start_time, end_time)
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Summary statistics of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    /// Channel identifier
    pub channel_id: ChannelId,

    /// Readings summarised
    pub sample_count: u64,

    /// Minimum reading
    pub min_value: f64,

    /// Maximum reading
    pub max_value: f64,

    /// Arithmetic mean
    pub average_value: f64,

    /// Root mean square
    pub rms_value: f64,

    /// Population standard deviation
    pub standard_deviation: f64,
}

/// Statistics over a stream and time range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataStatistics {
    /// Stream summarised
    pub stream_id: StreamId,

    /// Range start
    pub start_time: DateTime<Utc>,

    /// Range end
    pub end_time: DateTime<Utc>,

    /// `end_time - start_time`
    pub duration: Duration,

    /// Sum of per-channel sample counts
    pub total_samples: u64,

    /// On-disk size of the shards scanned
    pub total_bytes: u64,

    /// Stored bytes recorded for the stream
    pub compressed_bytes: u64,

    /// Stored over raw bytes recorded for the stream
    pub compression_ratio: f64,

    /// Per-channel statistics
    pub channel_stats: BTreeMap<ChannelId, ChannelStatistics>,

    /// Packets that fell inside the range
    pub data_packets: usize,
}

// ============================================================================
// Deletion
// ============================================================================

/// Outcome of deleting a stream's old shards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataDeleteResult {
    /// Whether the delete ran
    pub success: bool,

    /// Failure description
    pub error_message: Option<String>,

    /// Stream affected
    pub stream_id: StreamId,

    /// Cutoff: shards whose hour precedes this were removed
    pub deleted_before: DateTime<Utc>,

    /// Shard files removed
    pub deleted_files: usize,

    /// Bytes freed, measured before removal
    pub deleted_bytes: u64,

    /// Time spent deleting
    pub delete_time: Duration,
}

// ============================================================================
// Status and optimization
// ============================================================================

/// Storage details of one stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStorageInfo {
    /// Stream identifier
    pub stream_id: StreamId,

    /// Display name (`Stream_<id>`)
    pub stream_name: String,

    /// When the context was created
    pub start_time: DateTime<Utc>,

    /// Last successful write, if any
    pub last_write_time: Option<DateTime<Utc>>,

    /// Whether the stream received writes in this process
    pub is_active: bool,

    /// Samples written in this process
    pub total_samples: u64,

    /// Current on-disk shard size
    pub total_bytes: u64,

    /// Stored bytes written in this process
    pub compressed_bytes: u64,

    /// Stored over raw bytes written in this process
    pub compression_ratio: f64,

    /// Packets written in this process
    pub packet_count: u64,

    /// Channels in the most recent packet
    pub channel_count: usize,

    /// Shard files on disk
    pub shard_count: usize,
}

/// Snapshot of the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    /// Size of the filesystem holding the base path
    pub total_capacity: u64,

    /// Used bytes on that filesystem
    pub used_space: u64,

    /// Free bytes on that filesystem
    pub available_space: u64,

    /// `used / total * 100`
    pub usage_percentage: f64,

    /// Registered streams
    pub active_streams: usize,

    /// Samples across streams
    pub total_samples: u64,

    /// On-disk bytes across streams
    pub total_bytes: u64,

    /// Mean of per-stream compression ratios
    pub average_compression_ratio: f64,

    /// Per-stream details
    pub stream_info: BTreeMap<StreamId, StreamStorageInfo>,

    /// Performance register snapshot
    pub performance: PerformanceSnapshot,
}

/// Outcome of a retention/optimization pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageOptimizationResult {
    /// Whether the pass ran
    pub success: bool,

    /// Failure description
    pub error_message: Option<String>,

    /// Stream targeted, `None` for all
    pub stream_id: Option<StreamId>,

    /// Bytes removed by retention
    pub bytes_freed: u64,

    /// Time spent
    pub optimization_time: Duration,

    /// Human-readable actions, including per-stream failures
    pub optimization_actions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_packet_builder_tracks_sample_count() {
        let packet = SamplePacket::new(1, ts(10, 0), 100.0)
            .with_channel(0, vec![1.0; 10])
            .with_channel(1, vec![2.0; 25]);
        assert_eq!(packet.sample_count, 25);
        assert_eq!(packet.total_samples(), 35);
    }

    #[test]
    fn test_points_expand_with_sample_rate() {
        let packet = SamplePacket::new(1, ts(10, 0), 4.0).with_channel(3, vec![1.0, 2.0, 3.0]);
        let points = packet.to_points(None);
        let base = to_nanos(&ts(10, 0)).unwrap();

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp_ns, base);
        assert_eq!(points[1].timestamp_ns, base + 250_000_000);
        assert_eq!(points[2].timestamp_ns, base + 500_000_000);
        assert!(points.iter().all(|p| p.channel_id == 3));
    }

    #[test]
    fn test_points_channel_filter() {
        let packet = SamplePacket::new(1, ts(10, 0), 1.0)
            .with_channel(0, vec![1.0, 2.0])
            .with_channel(1, vec![3.0, 4.0])
            .with_channel(2, vec![5.0, 6.0]);

        let points = packet.to_points(Some(&[2, 9]));
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.channel_id == 2));

        assert!(packet.to_points(Some(&[])).is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_sample_rate() {
        let zero = SamplePacket::new(1, ts(10, 0), 0.0);
        assert!(zero.validate().is_err());

        let nan = SamplePacket::new(1, ts(10, 0), f64::NAN);
        assert!(nan.validate().is_err());

        let ok = SamplePacket::new(1, ts(10, 0), 1.0);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_finite_readings() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let packet = SamplePacket::new(1, ts(10, 0), 1.0)
                .with_channel(0, vec![0.5])
                .with_channel(3, vec![1.0, bad, 3.0]);
            match packet.validate() {
                Err(StorageError::InvalidPacket(msg)) => {
                    assert!(msg.contains("channel 3 sample 1"), "{}", msg)
                },
                other => panic!("expected InvalidPacket, got {:?}", other),
            }
        }

        let extremes = SamplePacket::new(1, ts(10, 0), 1.0).with_channel(0, vec![f64::MAX, f64::MIN]);
        assert!(extremes.validate().is_ok());
    }

    #[test]
    fn test_packet_json_is_canonical() {
        let a = SamplePacket::new(1, ts(10, 0), 1.0)
            .with_channel(2, vec![1.0])
            .with_channel(1, vec![2.0]);
        let b = SamplePacket::new(1, ts(10, 0), 1.0)
            .with_channel(1, vec![2.0])
            .with_channel(2, vec![1.0]);

        let ja = serde_json::to_vec(&a).unwrap();
        let jb = serde_json::to_vec(&b).unwrap();
        assert_eq!(ja, jb);
        assert_eq!(ja[0], b'{');

        let back: SamplePacket = serde_json::from_slice(&ja).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_epoch_seconds() {
        let p = DataPoint::new(1_500_000_000, 0.0, 0);
        assert!((p.epoch_seconds() - 1.5).abs() < 1e-12);
        assert_eq!(from_nanos(p.timestamp_ns), p.timestamp());
    }
}
