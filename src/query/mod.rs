//! Historical queries, downsampling and statistics
//!
//! ```text
//! shards in date window ─► packets in [start, end] ─► points per channel
//!                                                     ├─► LTTB (over budget)
//!                                                     └─► statistics per shard ─► merge
//! ```

pub mod downsample;
pub mod engine;
pub mod statistics;

pub use downsample::lttb;
pub use engine::QueryEngine;
