//! 响应批处理模块：按数量和时间窗口聚合待发送的工具响应。
//!
//! # Batching Module
//!
//! Groups outgoing items so the relay receives fewer, larger deliveries.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchCollector`] | Holds the open batch; size and generation bookkeeping |
//! | [`BatchConfig`] | Size bound, delay bound, on/off switch |
//! | [`BatchProcessor`] | Closes batches and hands them to a [`BatchHandler`] |
//! | [`BatchStatistics`] | Batch counts, average size and inter-batch delay |
//!
//! ## Example
//!
//! ```rust
//! use codap_relay_worker::batch::{Batch, BatchConfig, BatchHandler, BatchProcessor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Print;
//!
//! #[async_trait::async_trait]
//! impl BatchHandler<String> for Print {
//!     async fn process_batch(&self, batch: Batch<String>) -> codap_relay_worker::Result<()> {
//!         println!("{} -> {:?}", batch.id, batch.items);
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> codap_relay_worker::Result<()> {
//! let config = BatchConfig::new()
//!     .with_max_batch_size(10)
//!     .with_max_batch_delay(Duration::from_millis(500));
//! let processor = BatchProcessor::new(config, Arc::new(Print));
//! processor.add("hello".to_string()).await?;
//! processor.flush().await?;
//! # Ok(())
//! # }
//! ```

mod collector;
mod processor;

pub use collector::{BatchAddResult, BatchCollector, BatchConfig, BatchItem};
pub use processor::{Batch, BatchHandler, BatchProcessor, BatchStatistics};
