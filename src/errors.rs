//! Error types for the connection pool

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by connection factories and by [`Conn::close`](crate::Conn::close)
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Shared form of a foreign error, kept behind an `Arc` so `PoolError` stays `Clone`
pub type SharedError = Arc<dyn StdError + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("invalid pool capacity: initial size {initial} must not exceed max size {max}, and max size must be positive")]
    InvalidCapacity { initial: usize, max: usize },

    #[error("connection factory failed while prefilling the pool after {created} connections: {source}")]
    Prefill {
        created: usize,
        #[source]
        source: SharedError,
    },

    #[error("connection factory failed: {0}")]
    Factory(#[source] SharedError),

    #[error("pool is closed")]
    PoolClosed,

    #[error("connection is nil, rejected by the pool")]
    NilConnection,

    #[error("failed to close connection: {0}")]
    Close(#[source] SharedError),

    #[error("operation was cancelled")]
    Cancelled,
}

impl PoolError {
    pub(crate) fn factory(source: BoxError) -> Self {
        Self::Factory(Arc::from(source))
    }

    pub(crate) fn close(source: BoxError) -> Self {
        Self::Close(Arc::from(source))
    }

    /// Whether the error came out of the caller-supplied factory
    pub fn is_factory_error(&self) -> bool {
        matches!(self, Self::Prefill { .. } | Self::Factory(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
