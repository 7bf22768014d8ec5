//! Core connection pool implementation

use crate::config::PoolConfig;
use crate::conn::Conn;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::wrapper::ConnWrapper;

use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Factory producing fresh connections for a pool
pub(crate) type ConnFactory<C> = Arc<dyn Fn() -> Result<C, BoxError> + Send + Sync>;

/// Operations callers program against, independent of the pool implementation
pub trait Pool: Send + Sync {
    /// Connection type handed out by the pool
    type Connection: Conn;

    /// Take an idle connection, or create one if none is idle
    fn acquire(&self) -> PoolResult<ConnWrapper<Self::Connection>>;

    /// Close the pool and every idle connection in it
    fn shutdown(&self);

    /// Number of idle connections
    fn size(&self) -> usize;
}

enum PoolState<C> {
    Open {
        conns: ArrayQueue<C>,
        factory: ConnFactory<C>,
    },
    Closed,
}

enum Checkout<C> {
    Idle(C),
    Empty(ConnFactory<C>),
}

/// Why a released connection did not make it back into the buffer
enum Rejected {
    Surplus,
    PoolClosed,
}

/// State shared between a pool handle and every wrapper it hands out
pub(crate) struct PoolInner<C: Conn> {
    state: RwLock<PoolState<C>>,
    capacity: usize,
    pub(crate) metrics: MetricsTracker,
}

impl<C: Conn> PoolInner<C> {
    fn checkout(&self) -> PoolResult<Checkout<C>> {
        let state = self.state.read();
        let PoolState::Open { conns, factory } = &*state else {
            return Err(PoolError::PoolClosed);
        };

        match conns.pop() {
            Some(conn) => {
                self.metrics.record_idle_hit();
                trace!(idle = conns.len(), "reusing idle connection");
                Ok(Checkout::Idle(conn))
            }
            None => Ok(Checkout::Empty(Arc::clone(factory))),
        }
    }

    fn finish_create(&self, created: Result<C, BoxError>) -> PoolResult<C> {
        match created {
            Ok(conn) => {
                self.metrics.record_created();
                self.metrics.record_fresh_acquire();
                debug!(capacity = self.capacity, "pool empty, created overflow connection");
                Ok(conn)
            }
            Err(e) => {
                self.metrics.record_factory_failure();
                warn!(error = %e, "connection factory failed");
                Err(PoolError::factory(e))
            }
        }
    }

    /// Hand a connection back to the idle buffer.
    ///
    /// The push happens under the read lock, so it can never land in a buffer
    /// that `shutdown` has already detached.
    pub(crate) fn put(&self, conn: Option<C>) -> PoolResult<()> {
        let conn = conn.ok_or(PoolError::NilConnection)?;

        let rejected = {
            let state = self.state.read();
            match &*state {
                PoolState::Open { conns, .. } => match conns.push(conn) {
                    Ok(()) => None,
                    Err(conn) => Some((conn, Rejected::Surplus)),
                },
                PoolState::Closed => Some((conn, Rejected::PoolClosed)),
            }
        };

        match rejected {
            None => {
                self.metrics.record_returned();
                trace!("connection returned to pool");
                Ok(())
            }
            Some((conn, Rejected::Surplus)) => {
                self.metrics.record_surplus();
                debug!(capacity = self.capacity, "pool full, closing surplus connection");
                conn.close().map_err(PoolError::close)
            }
            Some((conn, Rejected::PoolClosed)) => {
                self.metrics.record_closed_discard();
                debug!("pool closed, closing released connection");
                if let Err(e) = conn.close() {
                    debug!(error = %e, "closing connection released after shutdown failed");
                }
                Ok(())
            }
        }
    }

    fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), PoolState::Closed);
        let PoolState::Open { conns, .. } = previous else {
            return;
        };

        let mut drained = 0;
        while let Some(conn) = conns.pop() {
            drained += 1;
            if let Err(e) = conn.close() {
                warn!(error = %e, "failed to close idle connection during shutdown");
            }
        }
        self.metrics.record_drained(drained);
        info!(drained, "connection pool shut down");
    }

    fn size(&self) -> usize {
        match &*self.state.read() {
            PoolState::Open { conns, .. } => conns.len(),
            PoolState::Closed => 0,
        }
    }

    fn is_closed(&self) -> bool {
        matches!(*self.state.read(), PoolState::Closed)
    }

    fn metrics(&self) -> PoolMetrics {
        let (idle, is_closed) = match &*self.state.read() {
            PoolState::Open { conns, .. } => (conns.len(), false),
            PoolState::Closed => (0, true),
        };
        self.metrics.get_metrics(idle, self.capacity, is_closed)
    }
}

impl<C: Conn> Drop for PoolInner<C> {
    // Last handle and last wrapper are gone; idle connections still need closing.
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bounded, thread-safe connection pool
///
/// Idle connections live in a fixed-capacity lock-free queue. When the queue
/// is empty, `acquire` creates a new connection with the factory and hands it
/// straight to the caller; it only enters the queue once released. Releasing
/// into a full queue closes the connection instead of waiting.
///
/// Cloning a `ChannelPool` yields another handle to the same pool.
///
/// # Examples
///
/// ```
/// use connpool::{BoxError, ChannelPool, Conn};
///
/// struct Session(u32);
///
/// impl Conn for Session {
///     fn close(self) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// let pool = ChannelPool::new(2, 10, || Ok(Session(7))).unwrap();
/// assert_eq!(pool.size(), 2);
///
/// let session = pool.acquire().unwrap();
/// assert_eq!(session.0, 7);
/// assert_eq!(pool.size(), 1);
///
/// session.close().unwrap();
/// assert_eq!(pool.size(), 2);
/// ```
pub struct ChannelPool<C: Conn> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Conn> ChannelPool<C> {
    /// Create a pool holding at most `max_size` idle connections, prefilled
    /// with `initial_size` connections from `factory`
    pub fn new<F>(initial_size: usize, max_size: usize, factory: F) -> PoolResult<Self>
    where
        F: Fn() -> Result<C, BoxError> + Send + Sync + 'static,
    {
        let config = PoolConfig::new()
            .with_initial_size(initial_size)
            .with_max_size(max_size);
        Self::with_config(config, factory)
    }

    /// Create a pool from a [`PoolConfig`]
    ///
    /// If the factory fails during prefill, every connection created so far
    /// is closed and the error is returned.
    pub fn with_config<F>(config: PoolConfig, factory: F) -> PoolResult<Self>
    where
        F: Fn() -> Result<C, BoxError> + Send + Sync + 'static,
    {
        config.validate()?;

        let conns = ArrayQueue::new(config.max_size);
        let metrics = MetricsTracker::new();

        for created in 0..config.initial_size {
            match factory() {
                Ok(conn) => {
                    metrics.record_created();
                    // initial_size <= max_size, so the queue has room.
                    if let Err(conn) = conns.push(conn) {
                        warn!(max = config.max_size, "prefill overflowed the idle buffer, closing connection");
                        if let Err(e) = conn.close() {
                            debug!(error = %e, "failed to close prefilled connection");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, created, "connection factory failed during prefill");
                    while let Some(conn) = conns.pop() {
                        if let Err(e) = conn.close() {
                            debug!(error = %e, "failed to close prefilled connection");
                        }
                    }
                    return Err(PoolError::Prefill {
                        created,
                        source: Arc::from(e),
                    });
                }
            }
        }

        debug!(
            initial = config.initial_size,
            max = config.max_size,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                state: RwLock::new(PoolState::Open {
                    conns,
                    factory: Arc::new(factory),
                }),
                capacity: config.max_size,
                metrics,
            }),
        })
    }

    /// Take an idle connection, or create one with the factory
    ///
    /// Never waits on other callers. The only blocking work is the factory
    /// call when no connection is idle.
    pub fn acquire(&self) -> PoolResult<ConnWrapper<C>> {
        let conn = match self.inner.checkout()? {
            Checkout::Idle(conn) => conn,
            Checkout::Empty(factory) => self.inner.finish_create(factory())?,
        };
        Ok(self.wrap(conn))
    }

    /// Like [`acquire`](Self::acquire), but runs the factory on tokio's
    /// blocking thread pool
    ///
    /// If the returned future is dropped while the factory is still running,
    /// the new connection goes back to the pool once it is created.
    pub async fn acquire_async(&self) -> PoolResult<ConnWrapper<C>> {
        match self.inner.checkout()? {
            Checkout::Idle(conn) => Ok(self.wrap(conn)),
            Checkout::Empty(factory) => {
                let inner = Arc::clone(&self.inner);
                // Wrapped inside the task: an output nobody joins is dropped as a
                // wrapper, and its Drop releases the connection.
                tokio::task::spawn_blocking(move || -> PoolResult<ConnWrapper<C>> {
                    let conn = inner.finish_create(factory())?;
                    Ok(ConnWrapper::new(conn, inner))
                })
                .await
                .map_err(|_| PoolError::Cancelled)?
            }
        }
    }

    /// Close the pool and every idle connection in it
    ///
    /// Calling this more than once is a no-op. Connections checked out at the
    /// time are closed when their wrappers are released.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Number of idle connections, 0 once the pool is shut down
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Maximum number of idle connections
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    fn wrap(&self, conn: C) -> ConnWrapper<C> {
        ConnWrapper::new(conn, Arc::clone(&self.inner))
    }
}

impl<C: Conn> Clone for ChannelPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Conn> Pool for ChannelPool<C> {
    type Connection = C;

    fn acquire(&self) -> PoolResult<ConnWrapper<C>> {
        ChannelPool::acquire(self)
    }

    fn shutdown(&self) {
        ChannelPool::shutdown(self);
    }

    fn size(&self) -> usize {
        ChannelPool::size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct MockConn {
        closed: Arc<AtomicUsize>,
    }

    impl Conn for MockConn {
        fn close(self) -> Result<(), BoxError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Counters {
        created: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl Counters {
        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// Factory that fails once `fail_after` connections have been created
    fn counting_factory(
        fail_after: Option<usize>,
    ) -> (impl Fn() -> Result<MockConn, BoxError> + Send + Sync + 'static, Counters) {
        let created = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            created: Arc::clone(&created),
            closed: Arc::clone(&closed),
        };

        let factory = move || -> Result<MockConn, BoxError> {
            if fail_after.is_some_and(|limit| created.load(Ordering::SeqCst) >= limit) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
            }
            created.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn {
                closed: Arc::clone(&closed),
            })
        };
        (factory, counters)
    }

    fn mock_pool(initial: usize, max: usize) -> (ChannelPool<MockConn>, Counters) {
        let (factory, counters) = counting_factory(None);
        (ChannelPool::new(initial, max, factory).unwrap(), counters)
    }

    #[test]
    fn test_new_prefills_initial_connections() {
        let (pool, counters) = mock_pool(5, 30);

        assert_eq!(pool.size(), 5);
        assert_eq!(pool.capacity(), 30);
        assert_eq!(counters.created(), 5);
        assert!(!pool.is_closed());
    }

    #[test]
    fn test_invalid_capacity_never_calls_factory() {
        for (initial, max) in [(6, 5), (0, 0), (1, 0)] {
            let (factory, counters) = counting_factory(None);
            let result = ChannelPool::new(initial, max, factory);

            assert!(matches!(result, Err(PoolError::InvalidCapacity { .. })));
            assert_eq!(counters.created(), 0);
        }
    }

    #[test]
    fn test_prefill_failure_closes_created_connections() {
        let (factory, counters) = counting_factory(Some(2));
        let result = ChannelPool::new(5, 10, factory);

        assert!(matches!(result, Err(PoolError::Prefill { created: 2, .. })));
        assert_eq!(counters.created(), 2);
        assert_eq!(counters.closed(), 2);
    }

    #[test]
    fn test_acquire_idle_does_not_call_factory() {
        let (pool, counters) = mock_pool(3, 3);

        let _conn = pool.acquire().unwrap();

        assert_eq!(pool.size(), 2);
        assert_eq!(counters.created(), 3);
    }

    #[test]
    fn test_acquire_on_empty_creates_without_buffering() {
        let (pool, counters) = mock_pool(0, 3);

        let conn = pool.acquire().unwrap();

        assert_eq!(counters.created(), 1);
        assert_eq!(pool.size(), 0);

        conn.close().unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(counters.closed(), 0);
    }

    #[test]
    fn test_acquire_propagates_factory_error() {
        let (factory, counters) = counting_factory(Some(1));
        let pool = ChannelPool::new(1, 2, factory).unwrap();

        let held = pool.acquire().unwrap();
        let result = pool.acquire();

        match result {
            Err(PoolError::Factory(source)) => assert_eq!(source.to_string(), "refused"),
            other => panic!("expected factory error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(pool.size(), 0);
        assert_eq!(counters.created(), 1);
        assert_eq!(pool.metrics().factory_failures, 1);
        drop(held);
    }

    #[test]
    fn test_release_into_full_pool_discards_surplus() {
        let (pool, counters) = mock_pool(1, 1);

        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        first.close().unwrap();
        second.close().unwrap();

        assert_eq!(pool.size(), 1);
        assert_eq!(counters.closed(), 1);
        assert_eq!(pool.metrics().surplus_discarded, 1);
    }

    #[test]
    fn test_put_rejects_nil_connection() {
        let (pool, _) = mock_pool(0, 1);

        assert!(matches!(pool.inner.put(None), Err(PoolError::NilConnection)));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_shutdown_drains_and_closes() {
        let (pool, counters) = mock_pool(5, 30);
        let held = pool.acquire().unwrap();

        pool.shutdown();

        assert!(pool.is_closed());
        assert_eq!(pool.size(), 0);
        assert_eq!(counters.closed(), 4);
        assert!(matches!(pool.acquire(), Err(PoolError::PoolClosed)));

        held.close().unwrap();
        assert_eq!(counters.closed(), 5);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (pool, counters) = mock_pool(2, 2);

        pool.shutdown();
        pool.shutdown();

        assert_eq!(counters.closed(), 2);
        assert_eq!(pool.metrics().drained, 2);
    }

    #[test]
    fn test_acquire_after_shutdown_skips_factory() {
        let (pool, counters) = mock_pool(0, 2);
        pool.shutdown();

        assert!(matches!(pool.acquire(), Err(PoolError::PoolClosed)));
        assert_eq!(counters.created(), 0);
    }

    #[test]
    fn test_dropping_last_handle_closes_idle_connections() {
        let (pool, counters) = mock_pool(3, 3);
        let held = pool.acquire().unwrap();

        // The wrapper keeps the shared state alive.
        drop(pool);
        assert_eq!(counters.closed(), 0);

        drop(held);
        assert_eq!(counters.closed(), 3);
    }

    #[test]
    fn test_pool_trait_object_usage() {
        fn borrow_one<P: Pool>(pool: &P) -> usize {
            let conn = pool.acquire().unwrap();
            let idle = pool.size();
            drop(conn);
            idle
        }

        let (pool, _) = mock_pool(2, 2);
        assert_eq!(borrow_one(&pool), 1);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_clone_shares_state() {
        let (pool, _) = mock_pool(2, 2);
        let other = pool.clone();

        let _conn = other.acquire().unwrap();
        assert_eq!(pool.size(), 1);

        other.shutdown();
        assert!(pool.is_closed());
    }

    #[test]
    fn test_metrics_track_reuse() {
        let (pool, _) = mock_pool(1, 2);

        pool.acquire().unwrap().close().unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop(a);
        drop(b);

        let metrics = pool.metrics();
        assert_eq!(metrics.total_acquired, 3);
        assert_eq!(metrics.idle_hits, 2);
        assert_eq!(metrics.total_created, 2);
        assert_eq!(metrics.total_returned, 3);
        assert_eq!(metrics.idle_connections, 2);
    }

    #[tokio::test]
    async fn test_acquire_async() {
        let (pool, counters) = mock_pool(1, 2);

        let idle = pool.acquire_async().await.unwrap();
        let fresh = pool.acquire_async().await.unwrap();

        assert_eq!(counters.created(), 2);
        idle.close().unwrap();
        fresh.close().unwrap();
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_metrics_snapshot_after_shutdown() {
        let (pool, _) = mock_pool(2, 2);
        pool.shutdown();

        let metrics = pool.metrics();
        assert!(metrics.is_closed);
        assert_eq!(metrics.idle_connections, 0);
        assert_eq!(metrics.drained, 2);
    }

    #[derive(Debug)]
    struct FailingConn {
        attempts: Arc<AtomicUsize>,
    }

    impl Conn for FailingConn {
        fn close(self) -> Result<(), BoxError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("connection reset").into())
        }
    }

    fn failing_pool(initial: usize, max: usize) -> (ChannelPool<FailingConn>, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let pool = ChannelPool::new(initial, max, move || {
            Ok(FailingConn {
                attempts: Arc::clone(&counter),
            })
        })
        .unwrap();
        (pool, attempts)
    }

    #[test]
    fn test_surplus_close_error_is_surfaced() {
        let (pool, attempts) = failing_pool(1, 1);
        let idle = pool.acquire().unwrap();
        let overflow = pool.acquire().unwrap();

        idle.close().unwrap();
        match overflow.close() {
            Err(PoolError::Close(source)) => assert_eq!(source.to_string(), "connection reset"),
            other => panic!("expected close error, got {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_unusable_close_error_is_surfaced() {
        let (pool, attempts) = failing_pool(1, 1);
        let conn = pool.acquire().unwrap();
        conn.mark_unusable();

        assert!(matches!(conn.close(), Err(PoolError::Close(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_shutdown_swallows_close_errors() {
        let (pool, attempts) = failing_pool(3, 3);

        pool.shutdown();

        assert_eq!(pool.size(), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(pool.metrics().drained, 3);
    }

    #[test]
    fn test_release_after_shutdown_swallows_close_error() {
        let (pool, attempts) = failing_pool(1, 1);
        let conn = pool.acquire().unwrap();
        pool.shutdown();

        assert!(conn.close().is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().closed_discarded, 1);
    }

    #[tokio::test]
    async fn test_abandoned_acquire_async_returns_connection() {
        let created = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let (created_in, closed_in) = (Arc::clone(&created), Arc::clone(&closed));
        let pool = ChannelPool::new(0, 2, move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            created_in.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn {
                closed: Arc::clone(&closed_in),
            })
        })
        .unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_millis(20), pool.acquire_async()).await;
        assert!(result.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.metrics().total_created, 1);

        pool.shutdown();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_async_after_shutdown() {
        let (pool, _) = mock_pool(1, 2);
        pool.shutdown();

        assert!(matches!(pool.acquire_async().await, Err(PoolError::PoolClosed)));
    }
}
