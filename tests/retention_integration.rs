/// Integration tests for deletion, retention sweeps and statistics
///
/// Covers:
/// 1. Explicit deletion before a cutoff
/// 2. Retention and optimization passes (direct and via the sweeper)
/// 3. Statistics across shards
use acq_store::services::{RetentionSweeper, Service, ServiceHandle, ServiceStatus};
use acq_store::storage::layout;
use acq_store::{SamplePacket, StorageEngine, StorageError, StorageOptions};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 2, h, m, 0).unwrap()
}

fn packet(stream_id: u32, ts: DateTime<Utc>, values: Vec<f64>) -> SamplePacket {
    SamplePacket::new(stream_id, ts, 4.0).with_channel(0, values)
}

async fn open_with(dir: &TempDir, tweak: impl FnOnce(&mut StorageOptions)) -> StorageEngine {
    let mut options = StorageOptions::with_base_path(dir.path());
    tweak(&mut options);
    StorageEngine::open_default(options).await.unwrap()
}

// ============================================================================
// CATEGORY 1: DELETION
// ============================================================================

#[tokio::test]
async fn test_delete_then_query() {
    let dir = TempDir::new().unwrap();
    let engine = open_with(&dir, |_| {}).await;

    for h in [9, 10, 11] {
        assert!(engine.write(1, &packet(1, at(h, 0), vec![h as f64; 4]), false).await.success);
    }

    let cutoff = at(10, 0);
    let deleted = engine.delete(1, cutoff).await;
    assert!(deleted.success);
    assert_eq!(deleted.deleted_files, 1);
    assert!(deleted.deleted_bytes > 0);
    assert_eq!(deleted.deleted_before, cutoff);

    let before = engine.query(1, at(8, 0), at(9, 30), None, 1_000).await;
    assert!(before.success);
    assert_eq!(before.total_points, 0);

    let straddling = engine.query(1, at(9, 0), at(11, 0), None, 1_000).await;
    assert_eq!(straddling.total_points, 8);
    let floor = cutoff.timestamp() as f64;
    assert!(straddling.channels[&0].timestamps.iter().all(|&t| t >= floor));

    // Nothing left to delete
    let again = engine.delete(1, cutoff).await;
    assert!(again.success);
    assert_eq!(again.deleted_files, 0);
}

#[tokio::test]
async fn test_delete_unknown_stream() {
    let dir = TempDir::new().unwrap();
    let engine = open_with(&dir, |_| {}).await;

    let result = engine.delete(42, at(10, 0)).await;
    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("Stream 42 not found"));
}

// ============================================================================
// CATEGORY 2: RETENTION AND OPTIMIZATION
// ============================================================================

#[tokio::test]
async fn test_optimize_respects_auto_cleanup_flag() {
    let dir = TempDir::new().unwrap();
    let engine = open_with(&dir, |o| {
        o.enable_auto_cleanup = false;
        o.data_retention_days = 7;
    })
    .await;

    let old = Utc::now() - ChronoDuration::days(30);
    assert!(engine.write(2, &packet(2, old, vec![1.0]), false).await.success);

    let result = engine.optimize(Some(2)).await;
    assert!(result.success);
    assert_eq!(result.bytes_freed, 0);
    assert_eq!(result.stream_id, Some(2));

    let shard = layout::shard_path(dir.path(), 2, &old);
    assert!(shard.exists());
}

#[tokio::test]
async fn test_optimize_reports_large_shards() {
    let dir = TempDir::new().unwrap();
    let engine = open_with(&dir, |o| {
        o.max_file_size_mb = 1;
        o.enable_compression = false;
    })
    .await;

    let now = Utc::now();
    let values: Vec<f64> = (0..200_000).map(|i| i as f64 * 0.001).collect();
    assert!(engine.write(3, &packet(3, now, values), false).await.success);

    let result = engine.optimize(None).await;
    assert!(result.success);
    assert!(result
        .optimization_actions
        .iter()
        .any(|a| a == "Stream 3: 1 large shard files are recompression candidates"));
}

#[tokio::test]
async fn test_concurrent_optimize_calls_do_not_overlap() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_with(&dir, |_| {}).await);

    let now = Utc::now();
    for h in 0..24 {
        let ts = now - ChronoDuration::hours(h);
        assert!(engine.write(1, &packet(1, ts, vec![0.0]), false).await.success);
    }

    let (a, b) = tokio::join!(engine.optimize(None), engine.optimize(None));
    for result in [&a, &b] {
        if !result.success {
            assert_eq!(
                result.error_message.as_deref(),
                Some("optimization already in progress")
            );
        }
    }
    assert!(a.success || b.success);

    // Guard released afterwards
    assert!(engine.optimize(None).await.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweeper_removes_expired_shards() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_with(&dir, |o| o.data_retention_days = 30).await);

    let expired = Utc::now() - ChronoDuration::days(40);
    let fresh = Utc::now();
    assert!(engine.write(6, &packet(6, expired, vec![1.0]), false).await.success);
    assert!(engine.write(6, &packet(6, fresh, vec![2.0]), false).await.success);

    let sweeper = Arc::new(RetentionSweeper::new(
        Arc::clone(&engine),
        Duration::from_millis(50),
    ));
    let mut handle = ServiceHandle::spawn(sweeper.clone());

    let expired_shard = layout::shard_path(dir.path(), 6, &expired);
    for _ in 0..100 {
        if !expired_shard.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(!expired_shard.exists());
    assert!(layout::shard_path(dir.path(), 6, &fresh).exists());
    assert!(sweeper.passes() >= 1);
    assert!(handle.status().is_healthy());

    handle.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(sweeper.status(), ServiceStatus::Stopped);
}

// ============================================================================
// CATEGORY 3: STATISTICS
// ============================================================================

#[tokio::test]
async fn test_statistics_merge_across_shards() {
    let dir = TempDir::new().unwrap();
    let engine = open_with(&dir, |_| {}).await;

    let first = vec![1.0, 2.0, 3.0, 4.0];
    let second = vec![-6.0, 10.0];
    assert!(engine.write(8, &packet(8, at(10, 0), first.clone()), false).await.success);
    assert!(engine.write(8, &packet(8, at(11, 0), second.clone()), true).await.success);

    let stats = engine.statistics(8, at(0, 0), at(23, 0)).await.unwrap();
    assert_eq!(stats.data_packets, 2);
    assert_eq!(stats.total_samples, 6);
    assert_eq!(stats.duration, Duration::from_secs(23 * 3600));
    assert!(stats.total_bytes > 0);

    let all: Vec<f64> = first.iter().chain(second.iter()).copied().collect();
    let n = all.len() as f64;
    let mean = all.iter().sum::<f64>() / n;
    let rms = (all.iter().map(|v| v * v).sum::<f64>() / n).sqrt();
    let std = (all.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    let ch = &stats.channel_stats[&0];
    assert_eq!(ch.sample_count, 6);
    assert_eq!(ch.min_value, -6.0);
    assert_eq!(ch.max_value, 10.0);
    assert!((ch.average_value - mean).abs() < 1e-12);
    assert!((ch.rms_value - rms).abs() < 1e-12);
    assert!((ch.standard_deviation - std).abs() < 1e-12);
}

#[tokio::test]
async fn test_statistics_unknown_stream_is_error() {
    let dir = TempDir::new().unwrap();
    let engine = open_with(&dir, |_| {}).await;

    let err = engine.statistics(77, at(0, 0), at(1, 0)).await.unwrap_err();
    assert!(matches!(err, StorageError::StreamNotFound(77)));
}
