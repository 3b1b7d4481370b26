//! Framed Snappy codec
//!
//! Uses the Snappy framing format rather than raw blocks: every frame stream
//! opens with the stream identifier chunk (`0xFF`), so a compressed payload
//! can never start with the raw-JSON marker `{`.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::Compressor;
use crate::error::CompressionError;

/// First byte of every framed Snappy stream
pub const SNAPPY_FRAME_MARKER: u8 = 0xFF;

/// Snappy compressor with operation counters
#[derive(Debug, Default)]
pub struct SnappyCompressor {
    compressed: AtomicU64,
    decompressed: AtomicU64,
}

impl SnappyCompressor {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful compress calls
    pub fn compress_count(&self) -> u64 {
        self.compressed.load(Ordering::Relaxed)
    }

    /// Number of successful decompress calls
    pub fn decompress_count(&self) -> u64 {
        self.decompressed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Compressor for SnappyCompressor {
    fn algorithm_id(&self) -> &str {
        "snappy-framed"
    }

    async fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = snap::write::FrameEncoder::new(Vec::with_capacity(data.len() / 2));
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::CompressionFailed(e.to_string()))?;
        let out = encoder
            .into_inner()
            .map_err(|e| CompressionError::CompressionFailed(e.to_string()))?;

        self.compressed.fetch_add(1, Ordering::Relaxed);
        Ok(out)
    }

    async fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if data.first() != Some(&SNAPPY_FRAME_MARKER) {
            return Err(CompressionError::DecompressionFailed(
                "missing snappy stream identifier".to_string(),
            ));
        }

        let mut decoder = snap::read::FrameDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;

        self.decompressed.fetch_add(1, Ordering::Relaxed);
        Ok(out)
    }
}
