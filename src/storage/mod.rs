//! Storage layer for acquisition streams
//!
//! # Architecture
//!
//! ```text
//! Write Flow:
//! write() → outer gate → encode → compress? → append to hour shard → stream totals
//!
//! Layout:
//! base_path/stream_{id}/data_{yyyyMMdd}_{HH}.shard
//! ```
//!
//! # Key Components
//!
//! - **StorageEngine**: facade over every storage operation
//! - **StreamRegistry**: owned map of per-stream contexts
//! - **WritePipeline**: single and batch packet writes
//! - **WriteLimiter**: nested write concurrency gates
//! - **layout** / **shard**: file naming and record framing

/// Per-stream contexts and the stream registry
pub mod context;
/// Storage engine facade
pub mod engine;
/// Shard path and name functions
pub mod layout;
/// Nested write concurrency gates
pub mod limiter;
/// Shard record framing and file I/O
pub mod shard;
/// Packet write pipeline
pub mod writer;

pub use context::{StreamContext, StreamRegistry, StreamTotals};
pub use engine::StorageEngine;
pub use limiter::{BatchGate, WriteLimiter};
pub use writer::WritePipeline;
