//! Performance metrics for the storage engine
//!
//! Two layers:
//!
//! - [`PerformanceMetrics`]: an owned register held by each engine, snapshotted
//!   into [`StorageStatus`](crate::types::StorageStatus)
//! - process-wide Prometheus collectors, exported as text by [`gather_metrics`]

use lazy_static::lazy_static;
use parking_lot::RwLock;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::types::StreamId;

lazy_static! {
    // === Operation Counters ===

    /// Total packet writes
    pub static ref WRITES_TOTAL: CounterVec = register_counter_vec!(
        "acq_store_writes_total",
        "Total packet write operations",
        &["stream_id", "status"]
    ).unwrap();

    /// Bytes written by kind (raw = encoded, stored = after compression)
    pub static ref WRITE_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "acq_store_write_bytes_total",
        "Bytes handled by the write pipeline",
        &["kind"]
    ).unwrap();

    /// Total read operations
    pub static ref READS_TOTAL: CounterVec = register_counter_vec!(
        "acq_store_reads_total",
        "Total read operations",
        &["operation", "status"]
    ).unwrap();

    /// Shard bytes removed
    pub static ref DELETED_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "acq_store_deleted_bytes_total",
        "Shard bytes removed",
        &["source"]
    ).unwrap();

    /// Sweep passes
    pub static ref SWEEPS_TOTAL: CounterVec = register_counter_vec!(
        "acq_store_sweeps_total",
        "Retention and optimization passes",
        &["status"]
    ).unwrap();

    /// Codec failures that fell back to raw bytes
    pub static ref CODEC_FALLBACKS_TOTAL: CounterVec = register_counter_vec!(
        "acq_store_codec_fallbacks_total",
        "Compression transform failures recovered by using raw bytes",
        &["direction"]
    ).unwrap();

    // === Latency Histograms ===

    /// Write operation duration
    pub static ref WRITE_DURATION: HistogramVec = register_histogram_vec!(
        "acq_store_write_duration_seconds",
        "Write operation latency in seconds",
        &["operation"],
        vec![0.0005, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Read operation duration
    pub static ref READ_DURATION: HistogramVec = register_histogram_vec!(
        "acq_store_read_duration_seconds",
        "Read operation latency in seconds",
        &["operation"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // === Resource Gauges ===

    /// Registered streams
    pub static ref STREAMS: Gauge = register_gauge!(
        "acq_store_streams",
        "Number of registered streams"
    ).unwrap();

    /// Disk usage of the storage volume
    pub static ref DISK_BYTES: GaugeVec = register_gauge_vec!(
        "acq_store_disk_bytes",
        "Storage volume bytes by type",
        &["type"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one packet write
#[inline]
pub fn record_write(stream_id: StreamId, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    WRITES_TOTAL
        .with_label_values(&[&stream_id.to_string(), status])
        .inc();

    WRITE_DURATION
        .with_label_values(&["packet"])
        .observe(duration_secs);
}

/// Record bytes passed through the write pipeline
#[inline]
pub fn record_write_bytes(raw: u64, stored: u64) {
    WRITE_BYTES_TOTAL.with_label_values(&["raw"]).inc_by(raw as f64);
    WRITE_BYTES_TOTAL.with_label_values(&["stored"]).inc_by(stored as f64);
}

/// Record a completed batch
#[inline]
pub fn record_batch(duration_secs: f64) {
    WRITE_DURATION
        .with_label_values(&["batch"])
        .observe(duration_secs);
}

/// Record a read operation (`query`, `statistics`)
#[inline]
pub fn record_read(operation: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    READS_TOTAL.with_label_values(&[operation, status]).inc();
    READ_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Record removed shard bytes (`delete`, `retention`)
#[inline]
pub fn record_deleted(source: &str, bytes: u64) {
    DELETED_BYTES_TOTAL
        .with_label_values(&[source])
        .inc_by(bytes as f64);
}

/// Record a sweep pass
#[inline]
pub fn record_sweep(success: bool) {
    let status = if success { "success" } else { "error" };
    SWEEPS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a codec fallback (`compress`, `decompress`)
#[inline]
pub fn record_codec_fallback(direction: &str) {
    CODEC_FALLBACKS_TOTAL.with_label_values(&[direction]).inc();
}

/// Update the registered stream gauge
#[inline]
pub fn update_streams(count: usize) {
    STREAMS.set(count as f64);
}

/// Update storage volume gauges
#[inline]
pub fn update_disk(used: u64, available: u64) {
    DISK_BYTES.with_label_values(&["used"]).set(used as f64);
    DISK_BYTES.with_label_values(&["available"]).set(available as f64);
}

// ============================================================================
// Owned register
// ============================================================================

/// Point-in-time copy of a [`PerformanceMetrics`] register
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Write operations attempted
    pub total_writes: u64,

    /// Write operations that failed
    pub failed_writes: u64,

    /// Read operations attempted
    pub total_reads: u64,

    /// Read operations that failed
    pub failed_reads: u64,

    /// Stored bytes written
    pub bytes_written: u64,

    /// Shard bytes read
    pub bytes_read: u64,

    /// Mean write latency
    pub average_write_latency_ms: f64,

    /// Mean read latency
    pub average_read_latency_ms: f64,

    /// Throughput of the most recent successful write
    pub write_throughput_mbps: f64,

    /// Throughput of the most recent successful read
    pub read_throughput_mbps: f64,

    /// Input throughput of the compression transform
    pub compression_throughput_mbps: f64,

    /// Seconds since the register was created
    pub uptime_secs: f64,
}

#[derive(Debug, Default)]
struct RegisterState {
    total_writes: u64,
    failed_writes: u64,
    total_reads: u64,
    failed_reads: u64,
    bytes_written: u64,
    bytes_read: u64,
    write_latency: Duration,
    read_latency: Duration,
    last_write_mbps: f64,
    last_read_mbps: f64,
    compressed_input: u64,
    compression_time: Duration,
}

/// Performance register owned by one engine
#[derive(Debug)]
pub struct PerformanceMetrics {
    state: RwLock<RegisterState>,
    started: Instant,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    /// Empty register
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegisterState::default()),
            started: Instant::now(),
        }
    }

    /// Record one write attempt
    pub fn record_write(&self, bytes: u64, elapsed: Duration, success: bool) {
        let mut state = self.state.write();
        state.total_writes += 1;
        state.write_latency += elapsed;
        if success {
            state.bytes_written += bytes;
            state.last_write_mbps = throughput_mbps(bytes, elapsed);
        } else {
            state.failed_writes += 1;
        }
    }

    /// Record one read attempt
    pub fn record_read(&self, bytes: u64, elapsed: Duration, success: bool) {
        let mut state = self.state.write();
        state.total_reads += 1;
        state.read_latency += elapsed;
        if success {
            state.bytes_read += bytes;
            state.last_read_mbps = throughput_mbps(bytes, elapsed);
        } else {
            state.failed_reads += 1;
        }
    }

    /// Record one successful compression of `input_bytes`
    pub fn record_compression(&self, input_bytes: u64, elapsed: Duration) {
        let mut state = self.state.write();
        state.compressed_input += input_bytes;
        state.compression_time += elapsed;
    }

    /// Copy the current values
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let state = self.state.read();
        PerformanceSnapshot {
            total_writes: state.total_writes,
            failed_writes: state.failed_writes,
            total_reads: state.total_reads,
            failed_reads: state.failed_reads,
            bytes_written: state.bytes_written,
            bytes_read: state.bytes_read,
            average_write_latency_ms: mean_ms(state.write_latency, state.total_writes),
            average_read_latency_ms: mean_ms(state.read_latency, state.total_reads),
            write_throughput_mbps: state.last_write_mbps,
            read_throughput_mbps: state.last_read_mbps,
            compression_throughput_mbps: throughput_mbps(
                state.compressed_input,
                state.compression_time,
            ),
            uptime_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        bytes as f64 / (1024.0 * 1024.0) / secs
    }
}

fn mean_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}
