//! Shard record framing and shard file I/O
//!
//! A shard file is an append-only sequence of records:
//!
//! ```text
//! | payload_len: u32 BE | payload (payload_len bytes) | payload_len | payload | ...
//! ```
//!
//! A payload is either the raw JSON encoding of one [`SamplePacket`]
//! (leading byte `{`) or the compressed form of it. The leading byte is the
//! only thing that tells them apart; there is no per-record header flag.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::compression::Compressor;
use crate::error::StorageError;
use crate::metrics;
use crate::storage::layout;
use crate::types::SamplePacket;

/// Size of the length prefix in front of each payload
pub const RECORD_HEADER_LEN: usize = 4;

/// Leading byte of an uncompressed payload
pub const RAW_MARKER: u8 = b'{';

/// One shard file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFile {
    /// Full path
    pub path: PathBuf,

    /// Hour bucket parsed from the file name
    pub hour: DateTime<Utc>,

    /// File size when listed
    pub size: u64,
}

/// Whether a payload is stored uncompressed
pub fn is_raw(payload: &[u8]) -> bool {
    payload.first() == Some(&RAW_MARKER)
}

/// Prefix a payload with its length
pub fn frame_record(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Payloads split out of a shard's bytes
#[derive(Debug, Default)]
pub struct RecordSplit<'a> {
    /// Complete payloads in file order
    pub records: Vec<&'a [u8]>,

    /// Bytes after the last complete record (interrupted append)
    pub trailing_bytes: usize,
}

/// Split shard contents into payloads
///
/// Stops at the first incomplete record; everything before it is returned.
pub fn split_records(data: &[u8]) -> RecordSplit<'_> {
    let mut split = RecordSplit::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < RECORD_HEADER_LEN {
            split.trailing_bytes = remaining;
            break;
        }

        let mut len_bytes = [0u8; RECORD_HEADER_LEN];
        len_bytes.copy_from_slice(&data[offset..offset + RECORD_HEADER_LEN]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        let body_start = offset + RECORD_HEADER_LEN;
        if len > data.len() - body_start {
            split.trailing_bytes = remaining;
            break;
        }

        split.records.push(&data[body_start..body_start + len]);
        offset = body_start + len;
    }

    split
}

/// Append one framed payload to a shard, creating it if needed
///
/// Returns the number of bytes appended (header included).
pub async fn append_record(path: &Path, payload: &[u8]) -> Result<u64, StorageError> {
    let framed = frame_record(payload);

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&framed).await?;
    file.flush().await?;

    Ok(framed.len() as u64)
}

/// Make a shard safe to append to, returning its valid length
///
/// When the file length differs from `known_len` (the length this process
/// last left it at), the shard is rescanned and an incomplete trailing
/// record is truncated away. A missing shard has length 0.
pub async fn repair_tail(path: &Path, known_len: Option<u64>) -> Result<u64, StorageError> {
    let len = match fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    if known_len == Some(len) {
        return Ok(len);
    }

    let data = fs::read(path).await?;
    let trailing = split_records(&data).trailing_bytes as u64;
    let valid = data.len() as u64 - trailing;
    if trailing > 0 {
        let file = fs::OpenOptions::new().write(true).open(path).await?;
        file.set_len(valid).await?;
        file.sync_all().await?;
        warn!(
            path = %path.display(),
            truncated_bytes = trailing,
            valid_bytes = valid,
            "Truncated incomplete record at shard tail"
        );
    }
    Ok(valid)
}

/// List a stream directory's shard files, oldest hour first
///
/// A missing directory yields an empty list. Files whose names do not parse
/// as shards are ignored.
pub async fn list_shards(dir: &Path) -> Result<Vec<ShardFile>, StorageError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut shards = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(hour) = name.to_str().and_then(layout::parse_shard_hour) else {
            continue;
        };

        // Deleted between listing and stat: skip
        let size = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        shards.push(ShardFile {
            path: entry.path(),
            hour,
            size,
        });
    }

    shards.sort_by(|a, b| a.hour.cmp(&b.hour));
    Ok(shards)
}

/// Decode one payload into a packet
///
/// Compressed payloads go through the codec first; if that fails the bytes
/// are retried as-is.
pub async fn decode_payload(
    payload: &[u8],
    compressor: &dyn Compressor,
    path: &Path,
) -> Result<SamplePacket, StorageError> {
    if is_raw(payload) {
        return Ok(serde_json::from_slice(payload)?);
    }

    match compressor.decompress(payload).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Shard record decompression failed, retrying as raw bytes"
            );
            metrics::record_codec_fallback("decompress");
            Ok(serde_json::from_slice(payload)?)
        },
    }
}

/// Read every decodable packet from a shard
///
/// A shard that vanished (concurrent delete) reads as empty. Undecodable
/// records are skipped with a warning.
pub async fn read_packets(
    path: &Path,
    compressor: &dyn Compressor,
) -> Result<Vec<SamplePacket>, StorageError> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let split = split_records(&data);
    if split.trailing_bytes > 0 {
        warn!(
            path = %path.display(),
            trailing_bytes = split.trailing_bytes,
            "Shard ends with an incomplete record"
        );
    }

    let mut packets = Vec::with_capacity(split.records.len());
    for (index, payload) in split.records.iter().enumerate() {
        match decode_payload(payload, compressor, path).await {
            Ok(packet) => packets.push(packet),
            Err(e) => warn!(
                path = %path.display(),
                record = index,
                error = %e,
                "Skipping undecodable shard record"
            ),
        }
    }

    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::SnappyCompressor;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn packet(seq: u64) -> SamplePacket {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        SamplePacket::new(1, ts, 10.0)
            .with_sequence(seq)
            .with_channel(0, vec![seq as f64; 8])
    }

    #[test]
    fn test_split_records() {
        let mut data = frame_record(b"{a}");
        data.extend(frame_record(b"xyz12"));
        let split = split_records(&data);
        assert_eq!(split.records, vec![&b"{a}"[..], &b"xyz12"[..]]);
        assert_eq!(split.trailing_bytes, 0);
    }

    #[test]
    fn test_split_records_stops_at_truncation() {
        let mut data = frame_record(b"{first}");
        let second = frame_record(b"{second}");
        data.extend_from_slice(&second[..6]);

        let split = split_records(&data);
        assert_eq!(split.records, vec![&b"{first}"[..]]);
        assert_eq!(split.trailing_bytes, 6);

        // Partial length prefix
        let split = split_records(&[0u8, 0]);
        assert!(split.records.is_empty());
        assert_eq!(split.trailing_bytes, 2);
    }

    #[tokio::test]
    async fn test_repair_tail_truncates_torn_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_20240301_10.shard");
        let codec = SnappyCompressor::new();

        let first = serde_json::to_vec(&packet(1)).unwrap();
        let clean_len = append_record(&path, &first).await.unwrap();

        // Unchanged since the last append: no rescan needed
        assert_eq!(repair_tail(&path, Some(clean_len)).await.unwrap(), clean_len);

        {
            let mut file = fs::OpenOptions::new().append(true).open(&path).await.unwrap();
            file.write_all(&[0, 0, 1, 0, b'{', b'"']).await.unwrap();
        }
        assert_eq!(repair_tail(&path, Some(clean_len)).await.unwrap(), clean_len);
        assert_eq!(fs::metadata(&path).await.unwrap().len(), clean_len);

        let second = serde_json::to_vec(&packet(2)).unwrap();
        append_record(&path, &second).await.unwrap();
        let packets = read_packets(&path, &codec).await.unwrap();
        assert_eq!(packets, vec![packet(1), packet(2)]);

        // Unknown length, intact file: left alone
        let len = fs::metadata(&path).await.unwrap().len();
        assert_eq!(repair_tail(&path, None).await.unwrap(), len);

        let missing = dir.path().join("data_20240301_11.shard");
        assert_eq!(repair_tail(&missing, None).await.unwrap(), 0);
    }

    #[test]
    fn test_is_raw() {
        assert!(is_raw(b"{\"x\":1}"));
        assert!(!is_raw(&[0xFF, 0x06]));
        assert!(!is_raw(b""));
    }

    #[tokio::test]
    async fn test_append_and_read_mixed_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_20240301_10.shard");
        let codec = SnappyCompressor::new();

        let raw = serde_json::to_vec(&packet(1)).unwrap();
        append_record(&path, &raw).await.unwrap();

        let compressed = codec
            .compress(&serde_json::to_vec(&packet(2)).unwrap())
            .await
            .unwrap();
        append_record(&path, &compressed).await.unwrap();

        let packets = read_packets(&path, &codec).await.unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], packet(1));
        assert_eq!(packets[1], packet(2));
    }

    #[tokio::test]
    async fn test_read_skips_garbage_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_20240301_10.shard");
        let codec = SnappyCompressor::new();
        let fallbacks = || {
            metrics::CODEC_FALLBACKS_TOTAL
                .with_label_values(&["decompress"])
                .get()
        };
        let before = fallbacks();

        append_record(&path, b"not a packet").await.unwrap();
        append_record(&path, &serde_json::to_vec(&packet(3)).unwrap())
            .await
            .unwrap();

        let packets = read_packets(&path, &codec).await.unwrap();
        assert_eq!(packets, vec![packet(3)]);
        assert!(fallbacks() >= before + 1.0);
    }

    #[tokio::test]
    async fn test_read_missing_shard_is_empty() {
        let dir = TempDir::new().unwrap();
        let codec = SnappyCompressor::new();
        let packets = read_packets(&dir.path().join("gone.shard"), &codec)
            .await
            .unwrap();
        assert!(packets.is_empty());
    }

    #[tokio::test]
    async fn test_list_shards_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in [
            "data_20240301_11.shard",
            "data_20240301_09.shard",
            "notes.txt",
            "data_20240301_10.json",
        ] {
            std::fs::write(dir.path().join(name), b"1234").unwrap();
        }

        let shards = list_shards(dir.path()).await.unwrap();
        let names: Vec<_> = shards
            .iter()
            .map(|s| s.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["data_20240301_09.shard", "data_20240301_11.shard"]);
        assert!(shards.iter().all(|s| s.size == 4));

        let missing = list_shards(&dir.path().join("nope")).await.unwrap();
        assert!(missing.is_empty());
    }
}
