/// End-to-end tests for the write pipeline and historical queries
///
/// Covers:
/// 1. Round-trip integrity
/// 2. Multi-packet, multi-shard queries
/// 3. LTTB downsampling to a point budget
/// 4. Compression ratio reporting (single and batch)
/// 5. Damaged shard tolerance
use acq_store::storage::layout;
use acq_store::{SamplePacket, StorageEngine, StorageOptions};
use chrono::{DateTime, TimeZone, Utc};
use std::io::Write;
use tempfile::TempDir;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 14, h, m, 0).unwrap()
}

async fn open(dir: &TempDir) -> StorageEngine {
    StorageEngine::open_default(StorageOptions::with_base_path(dir.path()))
        .await
        .expect("engine should open")
}

fn ramp(n: usize, offset: f64) -> Vec<f64> {
    (0..n).map(|i| offset + i as f64 * 0.25).collect()
}

// ============================================================================
// CATEGORY 1: ROUND TRIP
// ============================================================================

#[tokio::test]
async fn test_written_values_come_back() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    let packet = SamplePacket::new(3, at(9, 15), 500.0)
        .with_sequence(1)
        .with_channel(0, ramp(64, 0.0))
        .with_channel(4, ramp(64, -10.0));

    for compress in [false, true] {
        let dir = TempDir::new().unwrap();
        let mut options = StorageOptions::with_base_path(dir.path());
        options.compression_threshold = 16;
        let engine = StorageEngine::open_default(options).await.unwrap();

        let written = engine.write(3, &packet, compress).await;
        assert!(written.success, "{:?}", written.error_message);

        let result = engine
            .query(3, packet.timestamp, packet.timestamp, None, 100_000)
            .await;
        assert!(result.success);
        assert_eq!(result.channels[&0].values, packet.channel_data[&0]);
        assert_eq!(result.channels[&4].values, packet.channel_data[&4]);
        assert_eq!(result.channels[&4].channel_name, "Channel_4");
    }

    // Channel filter
    assert!(engine.write(3, &packet, true).await.success);
    let only_four = engine
        .query(3, packet.timestamp, packet.timestamp, Some(&[4]), 100_000)
        .await;
    assert_eq!(only_four.channels.len(), 1);
    assert_eq!(only_four.total_points, 64);
}

// ============================================================================
// CATEGORY 2: MULTI-SHARD QUERIES
// ============================================================================

#[tokio::test]
async fn test_three_packets_across_two_hours() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    for (seq, ts) in [at(10, 0), at(10, 30), at(11, 0)].into_iter().enumerate() {
        let packet = SamplePacket::new(7, ts, 100.0)
            .with_sequence(seq as u64)
            .with_channel(0, ramp(100, seq as f64 * 100.0))
            .with_channel(1, ramp(100, -(seq as f64)));
        assert!(engine.write(7, &packet, true).await.success);
    }

    let result = engine.query(7, at(10, 0), at(11, 30), None, 1_000_000).await;
    assert!(result.success);
    assert!(!result.is_downsampled);
    assert!(result.downsampling_method.is_none());
    assert_eq!(result.total_points, 600);
    assert_eq!(result.returned_points, 600);

    for series in result.channels.values() {
        assert_eq!(series.values.len(), 300);
        assert!(series.timestamps.windows(2).all(|w| w[0] <= w[1]));
        assert!((series.sample_rate - 100.0).abs() < 1e-6);
    }

    // Two shards on disk: 10:00 and 11:00
    let stream_dir = layout::stream_dir(dir.path(), 7);
    assert!(stream_dir.join("data_20240514_10.shard").exists());
    assert!(stream_dir.join("data_20240514_11.shard").exists());
}

#[tokio::test]
async fn test_packet_filter_uses_base_timestamp() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    for ts in [at(10, 0), at(10, 20), at(10, 40)] {
        let packet = SamplePacket::new(1, ts, 1.0).with_channel(0, vec![1.0, 2.0]);
        assert!(engine.write(1, &packet, false).await.success);
    }

    let result = engine.query(1, at(10, 10), at(10, 30), None, 1_000).await;
    assert_eq!(result.total_points, 2);
    assert_eq!(result.channels[&0].timestamps[0], at(10, 20).timestamp() as f64);

    let empty = engine.query(1, at(12, 0), at(13, 0), None, 1_000).await;
    assert!(empty.success);
    assert_eq!(empty.total_points, 0);
    assert!(empty.channels.is_empty());
}

// ============================================================================
// CATEGORY 3: DOWNSAMPLING
// ============================================================================

#[tokio::test]
async fn test_fifty_thousand_samples_to_hundred_points() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    let values: Vec<f64> = (0..50_000).map(|i| (i as f64 / 700.0).sin() * 5.0).collect();
    let packet = SamplePacket::new(2, at(8, 0), 10_000.0).with_channel(0, values.clone());
    assert!(engine.write(2, &packet, true).await.success);

    let result = engine.query(2, at(8, 0), at(9, 0), None, 100).await;
    assert!(result.success);
    assert!(result.is_downsampled);
    assert_eq!(result.downsampling_method.as_deref(), Some("LTTB"));
    assert_eq!(result.total_points, 50_000);
    assert_eq!(result.returned_points, 100);

    let series = &result.channels[&0];
    let input = packet.to_points(None);
    assert_eq!(series.values.len(), 100);
    assert_eq!(series.values[0], values[0]);
    assert_eq!(series.values[99], values[49_999]);
    assert_eq!(series.timestamps[0], input[0].epoch_seconds());
    assert_eq!(series.timestamps[99], input[49_999].epoch_seconds());

    // Same input, same output
    let again = engine.query(2, at(8, 0), at(9, 0), None, 100).await;
    assert_eq!(again.channels[&0].values, series.values);
    assert_eq!(again.channels[&0].timestamps, series.timestamps);
}

// ============================================================================
// CATEGORY 4: COMPRESSION RATIOS
// ============================================================================

#[tokio::test]
async fn test_compression_ratio_reporting() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    let big = SamplePacket::new(1, at(10, 0), 1.0).with_channel(0, vec![1.5; 4_000]);
    let small = SamplePacket::new(1, at(10, 0), 1.0).with_channel(0, vec![1.5; 4]);

    let compressed = engine.write(1, &big, true).await;
    assert!(compressed.compressed_size < compressed.bytes_written);
    assert_eq!(
        compressed.compression_ratio,
        compressed.compressed_size as f64 / compressed.bytes_written as f64
    );

    let below_threshold = engine.write(1, &small, true).await;
    assert_eq!(below_threshold.compression_ratio, 1.0);

    let not_requested = engine.write(1, &big, false).await;
    assert_eq!(not_requested.compression_ratio, 1.0);
    assert_eq!(not_requested.compressed_size, not_requested.bytes_written);

    // Globally disabled
    let off_dir = TempDir::new().unwrap();
    let mut options = StorageOptions::with_base_path(off_dir.path());
    options.enable_compression = false;
    let off = StorageEngine::open_default(options).await.unwrap();
    assert_eq!(off.write(1, &big, true).await.compression_ratio, 1.0);
}

#[tokio::test]
async fn test_batch_ratio_is_capacity_weighted() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    let big = SamplePacket::new(1, at(10, 0), 1.0)
        .with_sequence(1)
        .with_channel(0, vec![2.0; 8_000]);
    let small = SamplePacket::new(1, at(10, 1), 1.0)
        .with_sequence(2)
        .with_channel(0, vec![2.0; 10]);

    // Per-packet ratios from individual writes of the same packets
    let r_big = engine.write(9, &SamplePacket { stream_id: 9, ..big.clone() }, true).await;
    let r_small = engine.write(9, &SamplePacket { stream_id: 9, ..small.clone() }, true).await;
    let mean_of_ratios = (r_big.compression_ratio + r_small.compression_ratio) / 2.0;

    let batch = engine.write_batch(1, &[big, small], true).await;
    assert!(batch.success);
    assert_eq!(batch.successful_packets, 2);
    assert_eq!(batch.total_bytes_written, r_big.bytes_written + r_small.bytes_written);
    assert_eq!(
        batch.average_compression_ratio,
        batch.total_compressed_size as f64 / batch.total_bytes_written as f64
    );
    assert!((batch.average_compression_ratio - mean_of_ratios).abs() > 0.05);
}

// ============================================================================
// CATEGORY 5: DAMAGED SHARDS
// ============================================================================

#[tokio::test]
async fn test_truncated_tail_keeps_earlier_records() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    let packet = SamplePacket::new(5, at(14, 0), 2.0).with_channel(0, vec![7.0, 8.0, 9.0]);
    let written = engine.write(5, &packet, false).await;
    let path = written.storage_location.unwrap();

    // Interrupted append: length prefix promises more than is there
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0, 0, 1, 0, b'{', b'"']).unwrap();

    let result = engine.query(5, at(14, 0), at(14, 0), None, 100).await;
    assert!(result.success);
    assert_eq!(result.channels[&0].values, vec![7.0, 8.0, 9.0]);
}

#[tokio::test]
async fn test_write_after_torn_tail_stays_readable() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    let first = SamplePacket::new(5, at(10, 0), 2.0).with_channel(0, vec![1.0, 2.0]);
    let written = engine.write(5, &first, false).await;
    let path = written.storage_location.unwrap();

    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0, 0, 1, 0, b'{', b'"']).unwrap();
    drop(file);

    let second = SamplePacket::new(5, at(10, 30), 2.0).with_channel(0, vec![3.0, 4.0]);
    assert!(engine.write(5, &second, true).await.success);

    let later = engine.query(5, at(10, 30), at(10, 30), None, 100).await;
    assert_eq!(later.channels[&0].values, vec![3.0, 4.0]);

    let both = engine.query(5, at(10, 0), at(10, 59), None, 100).await;
    assert_eq!(both.total_points, 4);

    // A fresh engine (no remembered shard lengths) sees a clean file too
    drop(engine);
    let reopened = open(&dir).await;
    let third = SamplePacket::new(5, at(10, 45), 2.0).with_channel(0, vec![5.0]);
    assert!(reopened.write(5, &third, false).await.success);
    let all = reopened.query(5, at(10, 0), at(10, 59), None, 100).await;
    assert_eq!(all.channels[&0].values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

// ============================================================================
// CATEGORY 6: REJECTED READINGS
// ============================================================================

#[tokio::test]
async fn test_non_finite_readings_fail_the_write() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir).await;

    for (i, bad) in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY].into_iter().enumerate() {
        let packet = SamplePacket::new(6, at(12, i as u32), 1.0).with_channel(0, vec![1.0, bad, 3.0]);
        for compress in [false, true] {
            let result = engine.write(6, &packet, compress).await;
            assert!(!result.success);
            assert!(result.error_message.unwrap().contains("not finite"));
        }
    }

    let totals = engine.stream(6).unwrap().totals();
    assert_eq!(totals.packet_count, 0);
    assert_eq!(engine.performance().failed_writes, 6);

    let batch = engine
        .write_batch(
            6,
            &[
                SamplePacket::new(6, at(13, 0), 1.0).with_sequence(1).with_channel(0, vec![1.0]),
                SamplePacket::new(6, at(13, 0), 1.0).with_sequence(2).with_channel(0, vec![f64::NAN]),
            ],
            false,
        )
        .await;
    assert!(!batch.success);
    assert_eq!(batch.successful_packets, 1);
    assert!(batch.failed_packet_errors[0].starts_with("packet 2:"));

    let result = engine.query(6, at(12, 0), at(13, 0), None, 100).await;
    assert_eq!(result.total_points, 1);
}
