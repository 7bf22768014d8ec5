//! Pool configuration options

use crate::errors::{PoolError, PoolResult};

/// Sizing for a connection pool
///
/// # Examples
///
/// ```
/// use connpool::PoolConfig;
///
/// let config = PoolConfig::new()
///     .with_initial_size(5)
///     .with_max_size(30);
///
/// assert_eq!(config.initial_size, 5);
/// assert_eq!(config.max_size, 30);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Number of connections created up front when the pool is built
    pub initial_size: usize,

    /// Maximum number of idle connections the pool keeps around
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 0,
            max_size: 10,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections created at construction
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Set the maximum number of idle connections
    ///
    /// # Examples
    ///
    /// ```
    /// use connpool::PoolConfig;
    ///
    /// let config = PoolConfig::new().with_max_size(0);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Check that `max_size` is positive and `initial_size` fits inside it
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 || self.initial_size > self.max_size {
            return Err(PoolError::InvalidCapacity {
                initial: self.initial_size,
                max: self.max_size,
            });
        }
        Ok(())
    }
}
