//! # connpool
//!
//! Bounded, thread-safe pool of reusable connections for Rust.
//!
//! ## Features
//!
//! - Fixed-capacity idle buffer backed by a lock-free queue
//! - Lazy overflow creation: an empty pool creates a connection instead of waiting
//! - Closing (or dropping) a checked-out connection returns it to the pool
//! - Per-connection `mark_unusable` to discard broken connections
//! - Idempotent shutdown that drains and closes idle connections
//! - Async acquisition with the factory offloaded to tokio's blocking pool
//! - Metrics and Prometheus text export
//!
//! ## Quick Start
//!
//! ```rust
//! use connpool::{BoxError, ChannelPool, Conn};
//!
//! struct Session;
//!
//! impl Conn for Session {
//!     fn close(self) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! let pool = ChannelPool::new(1, 4, || Ok(Session)).unwrap();
//! {
//!     let conn = pool.acquire().unwrap();
//!     // Connection goes back to the pool when `conn` goes out of scope
//! }
//! assert_eq!(pool.size(), 1);
//! pool.shutdown();
//! ```

mod config;
mod conn;
mod errors;
mod metrics;
mod pool;
mod wrapper;

pub use config::PoolConfig;
pub use conn::Conn;
pub use errors::{BoxError, PoolError, PoolResult, SharedError};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{ChannelPool, Pool};
pub use wrapper::ConnWrapper;
