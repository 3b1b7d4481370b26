//! Per-channel statistics and their merge across shards
//!
//! Each shard is summarised independently, then partial results are folded
//! together. Count, min, max and mean combine exactly. RMS and standard
//! deviation are pooled from the partials' second moments, so a merged
//! result equals a single pass over the union of the samples (up to
//! floating-point rounding).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::types::{ChannelId, ChannelStatistics, SamplePacket};

/// Partial statistics of one shard
#[derive(Debug, Clone, Default)]
pub struct ShardSummary {
    /// Per-channel statistics
    pub channels: BTreeMap<ChannelId, ChannelStatistics>,

    /// Packets whose base timestamp fell inside the range
    pub packets: usize,
}

/// Summarise one channel's readings
///
/// Uses population variance. Returns `None` for an empty slice.
pub fn compute(channel_id: ChannelId, values: &[f64]) -> Option<ChannelStatistics> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for &v in values {
        min = min.min(v);
        max = max.max(v);
        sum += v;
        sum_sq += v * v;
    }

    let mean = sum / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Some(ChannelStatistics {
        channel_id,
        sample_count: values.len() as u64,
        min_value: min,
        max_value: max,
        average_value: mean,
        rms_value: (sum_sq / n).sqrt(),
        standard_deviation: variance.sqrt(),
    })
}

/// Combine two partial results for the same channel
pub fn merge(a: &ChannelStatistics, b: &ChannelStatistics) -> ChannelStatistics {
    if a.sample_count == 0 {
        return b.clone();
    }
    if b.sample_count == 0 {
        return a.clone();
    }

    let n1 = a.sample_count as f64;
    let n2 = b.sample_count as f64;
    let n = n1 + n2;

    let mean = (a.average_value * n1 + b.average_value * n2) / n;
    let mean_sq = (a.rms_value.powi(2) * n1 + b.rms_value.powi(2) * n2) / n;

    let d1 = a.average_value - mean;
    let d2 = b.average_value - mean;
    let variance = (n1 * (a.standard_deviation.powi(2) + d1 * d1)
        + n2 * (b.standard_deviation.powi(2) + d2 * d2))
        / n;

    ChannelStatistics {
        channel_id: a.channel_id,
        sample_count: a.sample_count + b.sample_count,
        min_value: a.min_value.min(b.min_value),
        max_value: a.max_value.max(b.max_value),
        average_value: mean,
        rms_value: mean_sq.sqrt(),
        standard_deviation: variance.max(0.0).sqrt(),
    }
}

/// Fold `source` into `target`, channel by channel
pub fn merge_into(
    target: &mut BTreeMap<ChannelId, ChannelStatistics>,
    source: BTreeMap<ChannelId, ChannelStatistics>,
) {
    for (channel_id, stats) in source {
        match target.get_mut(&channel_id) {
            Some(existing) => *existing = merge(existing, &stats),
            None => {
                target.insert(channel_id, stats);
            },
        }
    }
}

/// Summarise the in-range packets of one shard
///
/// A packet is in range when its base timestamp lies in `[start, end]`.
pub fn summarize_shard(
    packets: &[SamplePacket],
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> ShardSummary {
    let mut values: BTreeMap<ChannelId, Vec<f64>> = BTreeMap::new();
    let mut in_range = 0;

    for packet in packets {
        if packet.timestamp < *start || packet.timestamp > *end {
            continue;
        }
        in_range += 1;
        for (&channel_id, readings) in &packet.channel_data {
            values.entry(channel_id).or_default().extend_from_slice(readings);
        }
    }

    let channels = values
        .into_iter()
        .filter_map(|(channel_id, v)| compute(channel_id, &v).map(|s| (channel_id, s)))
        .collect();

    ShardSummary {
        channels,
        packets: in_range,
    }
}
