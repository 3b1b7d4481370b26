//! Acquisition storage engine
//!
//! Persists multi-channel instrument sample packets in hour-sharded,
//! optionally compressed files and serves them back as per-channel series:
//! - Bounded concurrent single and batch writes
//! - Range queries with LTTB downsampling to a point budget
//! - Per-channel statistics merged across shards
//! - Retention and optimization sweeps in the background

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compression;
pub mod error;
pub mod storage;
pub mod types;

/// Performance register and Prometheus metrics
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Range queries, LTTB downsampling and statistics
pub mod query;

/// Background services: service handle and retention sweeper
pub mod services;

// Re-export main types
pub use compression::{Compressor, SnappyCompressor};
pub use config::StorageOptions;
pub use error::{Error, Result, StorageError};
pub use storage::StorageEngine;
pub use types::{
    BatchWriteResult, ChannelId, DataPoint, DataStatistics, HistoricalDataResult, SamplePacket,
    StreamId, WriteResult,
};
