//! Error types for the storage engine

use crate::types::StreamId;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Compression error
    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Compression transform errors
///
/// Always recoverable: the write and query paths fall back to raw bytes.
#[derive(Error, Debug)]
pub enum CompressionError {
    /// Compression operation failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Decompression operation failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Storage errors
///
/// Converted into failed result structs at the public operation boundary;
/// only [`StorageEngine::statistics`](crate::storage::StorageEngine::statistics)
/// hands one back to the caller directly.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No context has been registered for the stream
    #[error("Stream {0} not found")]
    StreamNotFound(StreamId),

    /// Packet failed validation before encoding
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Packet could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shard file contents are malformed
    #[error("Corrupted shard {path}: {reason}")]
    CorruptedShard {
        /// Path of the shard file
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// Time range validation failed
    #[error("Invalid time range: start {start} > end {end}")]
    InvalidTimeRange {
        /// Start of the range (RFC 3339)
        start: String,
        /// End of the range (RFC 3339)
        end: String,
    },

    /// Write gate was closed (engine shutting down)
    #[error("Write gate closed")]
    GateClosed,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
