//! Compression transform used by the write and query paths
//!
//! The storage engine treats compression as an opaque byte-stream transform:
//! bytes in, bytes out. Both directions may fail, and callers always recover
//! by falling back to the uncompressed bytes.
//!
//! - **Snappy**: framed Snappy, the default codec

pub mod snappy;

pub use snappy::SnappyCompressor;

use crate::error::CompressionError;
use async_trait::async_trait;

/// Byte-level compression transform
#[async_trait]
pub trait Compressor: Send + Sync + 'static {
    /// Unique identifier for this compression algorithm
    fn algorithm_id(&self) -> &str;

    /// Compress an encoded packet
    async fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Reverse [`Compressor::compress`]
    async fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}
