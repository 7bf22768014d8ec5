//! Connection handle that redirects `close` back into the pool

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::conn::Conn;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::pool::PoolInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WrapperState {
    Usable,
    Unusable,
    Closed,
}

/// A connection checked out of a [`ChannelPool`](crate::ChannelPool)
///
/// Closing the wrapper, or dropping it, hands the connection back to the pool.
/// A wrapper flagged with [`mark_unusable`](Self::mark_unusable) closes the
/// underlying connection instead.
pub struct ConnWrapper<C: Conn> {
    conn: Option<C>,
    pool: Arc<PoolInner<C>>,
    state: Mutex<WrapperState>,
}

impl<C: Conn> ConnWrapper<C> {
    pub(crate) fn new(conn: C, pool: Arc<PoolInner<C>>) -> Self {
        Self {
            conn: Some(conn),
            pool,
            state: Mutex::new(WrapperState::Usable),
        }
    }

    /// Flag the connection as broken so the next close discards it
    ///
    /// Flagging twice is a no-op.
    pub fn mark_unusable(&self) {
        let mut state = self.state.lock();
        if *state == WrapperState::Usable {
            *state = WrapperState::Unusable;
        }
    }

    /// Whether [`mark_unusable`](Self::mark_unusable) has been called
    pub fn is_unusable(&self) -> bool {
        *self.state.lock() == WrapperState::Unusable
    }

    /// Return the connection to the pool, or close it if it was marked unusable
    ///
    /// Errors from the connection's own `close` are surfaced when the pool
    /// discards it (unusable, or the pool is already full). Releasing into a
    /// pool that has been shut down always succeeds.
    pub fn close(mut self) -> PoolResult<()> {
        self.release()
    }

    /// Take the connection out of pool management entirely
    pub fn into_inner(mut self) -> C {
        *self.state.get_mut() = WrapperState::Closed;
        self.conn.take().expect("Connection already taken")
    }

    fn release(&mut self) -> PoolResult<()> {
        let previous = std::mem::replace(self.state.get_mut(), WrapperState::Closed);
        match previous {
            WrapperState::Closed => Ok(()),
            WrapperState::Unusable => {
                let Some(conn) = self.conn.take() else {
                    return Ok(());
                };
                self.pool.metrics.record_unusable();
                debug!("discarding connection marked unusable");
                conn.close().map_err(PoolError::close)
            }
            WrapperState::Usable => self.pool.put(self.conn.take()),
        }
    }
}

impl<C: Conn> Deref for ConnWrapper<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("Connection already taken")
    }
}

impl<C: Conn> DerefMut for ConnWrapper<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("Connection already taken")
    }
}

impl<C: Conn> Drop for ConnWrapper<C> {
    fn drop(&mut self) {
        if self.conn.is_some()
            && let Err(e) = self.release()
        {
            warn!(error = %e, "failed to release dropped connection");
        }
    }
}

impl<C: Conn> Conn for ConnWrapper<C> {
    fn close(self) -> Result<(), BoxError> {
        ConnWrapper::close(self).map_err(Into::into)
    }
}

impl<C: Conn + fmt::Debug> fmt::Debug for ConnWrapper<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnWrapper")
            .field("conn", &self.conn)
            .field("state", &*self.state.lock())
            .finish()
    }
}
