//! Shard file layout
//!
//! Pure functions mapping streams and timestamps to paths. Nothing here
//! touches the filesystem.
//!
//! # Directory Structure
//!
//! ```text
//! base_path/
//!   stream_{id}/
//!     data_{yyyyMMdd}_{HH}.shard   - one file per whole-hour bucket
//! ```
//!
//! A shard's file name fully determines the half-open interval
//! `[hour, hour + 1h)` it covers.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use std::path::{Path, PathBuf};

use crate::types::StreamId;

/// Prefix of every stream directory
pub const STREAM_DIR_PREFIX: &str = "stream_";

/// Prefix of every shard file
pub const SHARD_PREFIX: &str = "data_";

/// Extension of every shard file
pub const SHARD_EXTENSION: &str = "shard";

const HOUR_FORMAT: &str = "%Y%m%d_%H";

/// Directory holding one stream's shards
pub fn stream_dir(base_path: &Path, stream_id: StreamId) -> PathBuf {
    base_path.join(format!("{}{}", STREAM_DIR_PREFIX, stream_id))
}

/// Parse a stream id from a directory name (`stream_{id}`)
pub fn parse_stream_dir(name: &str) -> Option<StreamId> {
    name.strip_prefix(STREAM_DIR_PREFIX)?.parse().ok()
}

/// Start of the hour bucket containing `ts`
pub fn hour_bucket(ts: &DateTime<Utc>) -> DateTime<Utc> {
    let naive = ts.naive_utc();
    let hour = naive
        .date()
        .and_hms_opt(naive.hour(), 0, 0)
        .unwrap_or(naive);
    Utc.from_utc_datetime(&hour)
}

/// File name of the shard covering `ts`
pub fn shard_file_name(ts: &DateTime<Utc>) -> String {
    format!(
        "{}{}.{}",
        SHARD_PREFIX,
        ts.format(HOUR_FORMAT),
        SHARD_EXTENSION
    )
}

/// Full path of the shard covering `ts` for a stream
pub fn shard_path(base_path: &Path, stream_id: StreamId, ts: &DateTime<Utc>) -> PathBuf {
    stream_dir(base_path, stream_id).join(shard_file_name(ts))
}

/// Parse the hour bucket encoded in a shard file name
///
/// Returns `None` for anything that is not `data_{yyyyMMdd}_{HH}.shard`.
pub fn parse_shard_hour(file_name: &str) -> Option<DateTime<Utc>> {
    let stem = file_name
        .strip_prefix(SHARD_PREFIX)?
        .strip_suffix(SHARD_EXTENSION)?
        .strip_suffix('.')?;
    if stem.len() != 11 || stem.as_bytes()[8] != b'_' {
        return None;
    }

    // chrono needs minutes to build a datetime
    let with_minutes = format!("{}00", stem);
    let naive = NaiveDateTime::parse_from_str(&with_minutes, "%Y%m%d_%H%M").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Coarse query pre-filter
///
/// Selects shards whose hour falls in `[start.date, end.date + 1 day)`.
/// Filtering is by calendar date, not by hour: a narrow window still scans
/// every shard of the days it touches.
pub fn in_query_window(hour: &DateTime<Utc>, start: &DateTime<Utc>, end: &DateTime<Utc>) -> bool {
    let lower = day_start(start);
    let upper = day_start(end) + Duration::days(1);
    *hour >= lower && *hour < upper
}

/// Whether a shard's hour precedes `cutoff`
pub fn is_before(hour: &DateTime<Utc>, cutoff: &DateTime<Utc>) -> bool {
    hour < cutoff
}

fn day_start(ts: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_time(NaiveTime::MIN))
}
