//! LTTB (Largest Triangle Three Buckets) downsampling
//!
//! Reduces a chronologically ordered series to a target point count while
//! keeping its visual shape. The first and last points are always kept; each
//! interior bucket contributes the point forming the largest triangle with
//! the previously selected point and the average of the *next* bucket.
//!
//! The scan is left to right with a strict comparison, so ties resolve to
//! the earliest point and the output is fully deterministic.

use crate::types::DataPoint;

/// Name reported for this algorithm in query results
pub const METHOD_NAME: &str = "LTTB";

/// Downsample `points` to `threshold` points
///
/// Returns the input unchanged when it already fits. Thresholds below 3
/// degenerate: 0 yields nothing, 1 the first point, 2 the first and last.
pub fn lttb(points: &[DataPoint], threshold: usize) -> Vec<DataPoint> {
    let n = points.len();
    if n <= threshold {
        return points.to_vec();
    }

    match threshold {
        0 => return Vec::new(),
        1 => return vec![points[0]],
        2 => return vec![points[0], points[n - 1]],
        _ => {},
    }

    // Relative x keeps nanosecond offsets exact in f64
    let origin = points[0].timestamp_ns;
    let x = |p: &DataPoint| (p.timestamp_ns - origin) as f64;

    let mut result = Vec::with_capacity(threshold);
    result.push(points[0]);

    let bucket_size = (n - 2) as f64 / (threshold - 2) as f64;
    let mut a = 0usize;

    for i in 0..(threshold - 2) {
        let bucket_start = ((i as f64 * bucket_size).floor() as usize + 1).min(n - 1);
        let bucket_end = (((i + 1) as f64 * bucket_size).floor() as usize + 1).min(n - 1);

        // Look-ahead apex: average of the next bucket
        let next_start = bucket_end;
        let next_end = (((i + 2) as f64 * bucket_size).floor() as usize + 1).min(n);
        let (avg_x, avg_y) = if next_end > next_start {
            let next = &points[next_start..next_end];
            let count = next.len() as f64;
            let sum_x: f64 = next.iter().map(x).sum();
            let sum_y: f64 = next.iter().map(|p| p.value).sum();
            (sum_x / count, sum_y / count)
        } else {
            let last = &points[n - 1];
            (x(last), last.value)
        };

        let (a_x, a_y) = (x(&points[a]), points[a].value);
        let mut max_area = -1.0;
        let mut max_idx = bucket_start;

        for (j, p) in points
            .iter()
            .enumerate()
            .take(bucket_end)
            .skip(bucket_start)
        {
            let dx1 = a_x - avg_x;
            let dy1 = a_y - avg_y;
            let dx2 = a_x - x(p);
            let dy2 = a_y - p.value;
            let area = (dx1 * dy2 - dx2 * dy1).abs() / 2.0;

            if area > max_area {
                max_area = area;
                max_idx = j;
            }
        }

        result.push(points[max_idx]);
        a = max_idx;
    }

    result.push(points[n - 1]);
    result
}
