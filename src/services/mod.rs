//! Background Services Module
//!
//! # Services
//!
//! - **ServiceHandle**: owns a spawned service task and its shutdown channel
//! - **RetentionSweeper**: periodic retention and optimization pass over every stream
//!
//! # Example
//!
//! ```rust,no_run
//! use acq_store::{StorageEngine, StorageOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> acq_store::Result<()> {
//! let engine = Arc::new(StorageEngine::open_default(StorageOptions::default()).await?);
//! let mut sweeper = engine.start_background();
//!
//! // ... serve requests ...
//!
//! let _ = sweeper.shutdown(Duration::from_secs(30)).await;
//! # Ok(())
//! # }
//! ```

pub mod framework;
pub mod retention;

pub use framework::{Service, ServiceError, ServiceHandle, ServiceStatus};
pub use retention::RetentionSweeper;
