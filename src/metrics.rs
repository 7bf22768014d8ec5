//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time counters for a pool
///
/// # Examples
///
/// ```
/// use connpool::{BoxError, ChannelPool, Conn};
///
/// struct Noop;
///
/// impl Conn for Noop {
///     fn close(self) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// let pool = ChannelPool::new(2, 4, || Ok(Noop)).unwrap();
///
/// let conn = pool.acquire().unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.idle_hits, 1);
/// assert_eq!(metrics.idle_connections, 1);
/// # drop(conn);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolMetrics {
    /// Successful acquisitions, idle hits and fresh connections alike
    pub total_acquired: usize,

    /// Acquisitions served from the idle buffer
    pub idle_hits: usize,

    /// Connections produced by the factory, prefill included
    pub total_created: usize,

    /// Factory calls that returned an error
    pub factory_failures: usize,

    /// Connections handed back into the idle buffer
    pub total_returned: usize,

    /// Connections closed because the buffer was already full
    pub surplus_discarded: usize,

    /// Connections closed because their wrapper was marked unusable
    pub unusable_discarded: usize,

    /// Connections closed on release because the pool had been shut down
    pub closed_discarded: usize,

    /// Idle connections closed by shutdown
    pub drained: usize,

    /// Current idle connections
    pub idle_connections: usize,

    /// Maximum idle connections
    pub max_capacity: usize,

    /// Whether the pool has been shut down
    pub is_closed: bool,
}

impl PoolMetrics {
    /// Share of acquisitions that reused an idle connection (0.0 to 1.0)
    pub fn reuse_rate(&self) -> f64 {
        if self.total_acquired == 0 {
            return 0.0;
        }
        self.idle_hits as f64 / self.total_acquired as f64
    }

    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("idle_hits".to_string(), self.idle_hits.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("factory_failures".to_string(), self.factory_failures.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("surplus_discarded".to_string(), self.surplus_discarded.to_string());
        metrics.insert("unusable_discarded".to_string(), self.unusable_discarded.to_string());
        metrics.insert("closed_discarded".to_string(), self.closed_discarded.to_string());
        metrics.insert("drained".to_string(), self.drained.to_string());
        metrics.insert("idle_connections".to_string(), self.idle_connections.to_string());
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics.insert("is_closed".to_string(), self.is_closed.to_string());
        metrics.insert("reuse_rate".to_string(), format!("{:.2}", self.reuse_rate()));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use connpool::{BoxError, ChannelPool, Conn, MetricsExporter};
    /// use std::collections::HashMap;
    ///
    /// struct Noop;
    ///
    /// impl Conn for Noop {
    ///     fn close(self) -> Result<(), BoxError> {
    ///         Ok(())
    ///     }
    /// }
    ///
    /// let pool = ChannelPool::new(3, 3, || Ok(Noop)).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.metrics(), "db", Some(&tags));
    /// assert!(output.contains("connpool_connections_idle{pool=\"db\",service=\"api\"} 3"));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let labels = Self::format_labels(pool_name, tags);
        let mut output = String::new();

        let gauges = [
            ("connpool_connections_idle", "Current idle connections", metrics.idle_connections),
            ("connpool_connections_max", "Maximum idle connections", metrics.max_capacity),
            ("connpool_closed", "Whether the pool has been shut down", usize::from(metrics.is_closed)),
        ];
        for (name, help, value) in gauges {
            Self::push_sample(&mut output, name, help, "gauge", &labels, value);
        }

        let counters = [
            ("connpool_acquired_total", "Total successful acquisitions", metrics.total_acquired),
            ("connpool_idle_hits_total", "Acquisitions served from idle connections", metrics.idle_hits),
            ("connpool_created_total", "Connections created by the factory", metrics.total_created),
            ("connpool_factory_failures_total", "Failed factory calls", metrics.factory_failures),
            ("connpool_returned_total", "Connections returned to the pool", metrics.total_returned),
            ("connpool_surplus_discarded_total", "Connections closed because the pool was full", metrics.surplus_discarded),
            ("connpool_unusable_discarded_total", "Connections closed after being marked unusable", metrics.unusable_discarded),
            ("connpool_closed_discarded_total", "Connections closed after pool shutdown", metrics.closed_discarded),
            ("connpool_drained_total", "Idle connections closed by shutdown", metrics.drained),
        ];
        for (name, help, value) in counters {
            Self::push_sample(&mut output, name, help, "counter", &labels, value);
        }

        output
    }

    fn push_sample(output: &mut String, name: &str, help: &str, kind: &str, labels: &str, value: usize) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    total_acquired: AtomicUsize,
    idle_hits: AtomicUsize,
    total_created: AtomicUsize,
    factory_failures: AtomicUsize,
    total_returned: AtomicUsize,
    surplus_discarded: AtomicUsize,
    unusable_discarded: AtomicUsize,
    closed_discarded: AtomicUsize,
    drained: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_idle_hit(&self) {
        self.idle_hits.fetch_add(1, Ordering::Relaxed);
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fresh_acquire(&self) {
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_factory_failure(&self) {
        self.factory_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_returned(&self) {
        self.total_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_surplus(&self) {
        self.surplus_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unusable(&self) {
        self.unusable_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed_discard(&self) {
        self.closed_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drained(&self, count: usize) {
        self.drained.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, idle: usize, capacity: usize, is_closed: bool) -> PoolMetrics {
        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            idle_hits: self.idle_hits.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            factory_failures: self.factory_failures.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            surplus_discarded: self.surplus_discarded.load(Ordering::Relaxed),
            unusable_discarded: self.unusable_discarded.load(Ordering::Relaxed),
            closed_discarded: self.closed_discarded.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            idle_connections: idle,
            max_capacity: capacity,
            is_closed,
        }
    }
}
