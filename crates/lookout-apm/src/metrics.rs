//! Performance aggregation.
//!
//! Keeps bounded buffers of recent transaction durations, completions and
//! error samples, and derives throughput, latency percentiles and error rate
//! from them on demand. Buffers are capped on insert; the oldest element is
//! dropped first, so trimming never loses the most recent data.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::transaction::TransactionType;

/// Requests and transactions completed per second over the throughput window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub requests_per_second: f64,
    pub transactions_per_second: f64,
}

/// Response-time distribution in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimes {
    pub avg: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorRate {
    /// Buffered errors over buffered transactions, as a percentage.
    pub percentage: f64,
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub uptime_secs: u64,
    pub downtime_secs: u64,
    pub percentage: f64,
}

/// Host resource gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Point-in-time performance snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub timestamp: DateTime<Utc>,
    pub throughput: Throughput,
    pub response_time: ResponseTimes,
    pub error_rate: ErrorRate,
    pub availability: Availability,
    pub resources: ResourceUsage,
}

/// Nearest-rank percentile over an ascending slice.
///
/// Index is `ceil(p/100 * n) - 1`, clamped to the slice. Empty input yields 0.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    sorted[idx]
}

#[derive(Debug, Clone, Copy)]
struct Completion {
    at: DateTime<Utc>,
    is_request: bool,
}

#[derive(Debug, Clone)]
struct ErrorSample {
    at: DateTime<Utc>,
    error_type: String,
}

#[derive(Debug, Default)]
struct Buffers {
    durations: VecDeque<u64>,
    completions: VecDeque<Completion>,
    errors: VecDeque<ErrorSample>,
}

fn push_capped<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    buf.push_back(item);
    while buf.len() > cap {
        buf.pop_front();
    }
}

/// Sliding-window performance aggregator.
#[derive(Debug)]
pub struct PerformanceAggregator {
    config: MetricsConfig,
    started_at: DateTime<Utc>,
    buffers: Mutex<Buffers>,
}

impl PerformanceAggregator {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            started_at: Utc::now(),
            buffers: Mutex::new(Buffers::default()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn buffers(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a finished transaction.
    pub fn record_transaction(&self, kind: TransactionType, duration_ms: u64) {
        self.record_transaction_at(kind, duration_ms, Utc::now());
    }

    pub fn record_transaction_at(&self, kind: TransactionType, duration_ms: u64, at: DateTime<Utc>) {
        let cap = self.config.buffer_size.max(1);
        let mut buffers = self.buffers();
        push_capped(&mut buffers.durations, duration_ms, cap);
        push_capped(
            &mut buffers.completions,
            Completion {
                at,
                is_request: kind == TransactionType::Request,
            },
            cap,
        );
    }

    /// Record one tracked error occurrence.
    pub fn record_error(&self, error_type: &str) {
        self.record_error_at(error_type, Utc::now());
    }

    pub fn record_error_at(&self, error_type: &str, at: DateTime<Utc>) {
        let cap = self.config.max_error_samples.max(1);
        push_capped(
            &mut self.buffers().errors,
            ErrorSample {
                at,
                error_type: error_type.to_string(),
            },
            cap,
        );
    }

    /// Error occurrences recorded within `window` before `now`.
    pub fn errors_within(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - window;
        self.buffers()
            .errors
            .iter()
            .filter(|e| e.at >= cutoff && e.at <= now)
            .count()
    }

    /// Error rate restricted to `window` before `now`, as a percentage.
    ///
    /// Zero when no transaction completed in the window.
    pub fn error_rate_within(&self, window: Duration, now: DateTime<Utc>) -> f64 {
        let cutoff = now - window;
        let buffers = self.buffers();
        let in_window = |at: DateTime<Utc>| at >= cutoff && at <= now;
        let transactions = buffers.completions.iter().filter(|c| in_window(c.at)).count();
        if transactions == 0 {
            return 0.0;
        }
        let errors = buffers.errors.iter().filter(|e| in_window(e.at)).count();
        errors as f64 / transactions as f64 * 100.0
    }

    /// Compute the snapshot; `resources` is passed through unchanged.
    pub fn get_performance_metrics(&self, resources: ResourceUsage) -> PerformanceMetrics {
        self.get_performance_metrics_at(resources, Utc::now())
    }

    pub fn get_performance_metrics_at(
        &self,
        resources: ResourceUsage,
        now: DateTime<Utc>,
    ) -> PerformanceMetrics {
        let buffers = self.buffers();

        let window_secs = self.config.throughput_window_secs.max(1);
        let cutoff = now - Duration::seconds(window_secs as i64);
        let (requests, transactions) = buffers
            .completions
            .iter()
            .filter(|c| c.at >= cutoff && c.at <= now)
            .fold((0usize, 0usize), |(r, t), c| {
                (r + usize::from(c.is_request), t + 1)
            });
        let throughput = Throughput {
            requests_per_second: requests as f64 / window_secs as f64,
            transactions_per_second: transactions as f64 / window_secs as f64,
        };

        let mut sorted: Vec<u64> = buffers.durations.iter().copied().collect();
        sorted.sort_unstable();
        let response_time = ResponseTimes {
            avg: if sorted.is_empty() {
                0.0
            } else {
                sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
            },
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            max: sorted.last().copied().unwrap_or(0),
        };

        let mut by_type = BTreeMap::new();
        for sample in &buffers.errors {
            *by_type.entry(sample.error_type.clone()).or_insert(0) += 1;
        }
        let total = buffers.errors.len();
        let buffered = buffers.completions.len();
        let error_rate = ErrorRate {
            percentage: if buffered == 0 {
                0.0
            } else {
                total as f64 / buffered as f64 * 100.0
            },
            total,
            by_type,
        };
        drop(buffers);

        let uptime_secs = (now - self.started_at).num_seconds().max(0) as u64;
        PerformanceMetrics {
            timestamp: now,
            throughput,
            response_time,
            error_rate,
            availability: Availability {
                uptime_secs,
                downtime_secs: 0,
                percentage: 100.0,
            },
            resources,
        }
    }

    /// Release memory held beyond the configured bounds.
    pub fn trim(&self) {
        let mut buffers = self.buffers();
        let cap = self.config.buffer_size.max(1);
        buffers.durations.shrink_to(cap);
        buffers.completions.shrink_to(cap);
        buffers
            .errors
            .shrink_to(self.config.max_error_samples.max(1));
    }

    /// Buffered (durations, completions, error samples).
    pub fn buffered_counts(&self) -> (usize, usize, usize) {
        let buffers = self.buffers();
        (
            buffers.durations.len(),
            buffers.completions.len(),
            buffers.errors.len(),
        )
    }
}

/// Source of host resource gauges.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceUsage;
}

/// Sampler that reports zeros.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSampler;

impl ResourceSampler for NoopSampler {
    fn sample(&self) -> ResourceUsage {
        ResourceUsage::default()
    }
}

/// Host gauges read through `sysinfo`.
///
/// CPU usage is relative to the previous sample, so the first reading is 0.
pub struct SystemSampler {
    system: Mutex<sysinfo::System>,
}

impl std::fmt::Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler").finish_non_exhaustive()
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&self) -> ResourceUsage {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu();
        system.refresh_memory();

        let memory_percent = match system.total_memory() {
            0 => 0.0,
            total => system.used_memory() as f64 / total as f64 * 100.0,
        };
        let cpu_percent = system.global_cpu_info().cpu_usage();
        drop(system);

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let (total, available) = disks.list().iter().fold((0u64, 0u64), |(t, a), d| {
            (t + d.total_space(), a + d.available_space())
        });
        let disk_percent = if total == 0 {
            0.0
        } else {
            total.saturating_sub(available) as f64 / total as f64 * 100.0
        };

        let networks = sysinfo::Networks::new_with_refreshed_list();
        let (network_rx_bytes, network_tx_bytes) = networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });

        ResourceUsage {
            cpu_percent,
            memory_percent,
            disk_percent,
            network_rx_bytes,
            network_tx_bytes,
        }
    }
}

/// Downstream receiver of the periodic gauges.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn gauge(&self, name: &str, value: f64);
}

/// Sink that writes gauges to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn gauge(&self, name: &str, value: f64) {
        tracing::info!(metric = name, value, "gauge");
    }
}

/// The gauges emitted once per aggregation interval.
pub fn gauges(metrics: &PerformanceMetrics) -> [(&'static str, f64); 4] {
    [
        ("requests_per_second", metrics.throughput.requests_per_second),
        ("response_time_avg", metrics.response_time.avg),
        ("response_time_p95", metrics.response_time.p95 as f64),
        ("error_rate", metrics.error_rate.percentage),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> PerformanceAggregator {
        PerformanceAggregator::new(MetricsConfig::default())
    }

    #[test]
    fn test_nearest_rank_percentiles() {
        let agg = aggregator();
        let now = Utc::now();
        for d in [30, 10, 50, 20, 40] {
            agg.record_transaction_at(TransactionType::Request, d, now);
        }

        let rt = agg
            .get_performance_metrics_at(ResourceUsage::default(), now)
            .response_time;
        assert_eq!(rt.p50, 30);
        assert_eq!(rt.p95, 50);
        assert_eq!(rt.p99, 50);
        assert_eq!(rt.max, 50);
        assert_eq!(rt.avg, 30.0);
    }

    #[test]
    fn test_percentile_edges() {
        assert_eq!(percentile(&[], 50.0), 0);
        assert_eq!(percentile(&[7], 0.0), 7);
        assert_eq!(percentile(&[1, 2, 3, 4], 100.0), 4);
        assert_eq!(percentile(&[1, 2, 3, 4], 25.0), 1);
    }

    #[test]
    fn test_throughput_uses_trailing_window() {
        let agg = aggregator();
        let now = Utc::now();
        for _ in 0..6 {
            agg.record_transaction_at(TransactionType::Request, 5, now - Duration::seconds(10));
        }
        for _ in 0..6 {
            agg.record_transaction_at(TransactionType::Background, 5, now - Duration::seconds(30));
        }
        agg.record_transaction_at(TransactionType::Request, 5, now - Duration::seconds(90));

        let tp = agg
            .get_performance_metrics_at(ResourceUsage::default(), now)
            .throughput;
        assert_eq!(tp.requests_per_second, 0.1);
        assert_eq!(tp.transactions_per_second, 0.2);
    }

    #[test]
    fn test_error_rate_and_breakdown() {
        let agg = aggregator();
        let now = Utc::now();
        for _ in 0..4 {
            agg.record_transaction_at(TransactionType::Request, 5, now);
        }
        agg.record_error_at("TypeError", now);
        agg.record_error_at("TypeError", now);
        agg.record_error_at("DbError", now);

        let rate = agg
            .get_performance_metrics_at(ResourceUsage::default(), now)
            .error_rate;
        assert_eq!(rate.total, 3);
        assert_eq!(rate.percentage, 75.0);
        assert_eq!(rate.by_type["TypeError"], 2);
        assert_eq!(rate.by_type["DbError"], 1);
    }

    #[test]
    fn test_windowed_error_queries() {
        let agg = aggregator();
        let now = Utc::now();
        agg.record_transaction_at(TransactionType::Request, 5, now - Duration::minutes(2));
        agg.record_transaction_at(TransactionType::Request, 5, now - Duration::minutes(20));
        agg.record_error_at("E", now - Duration::minutes(1));
        agg.record_error_at("E", now - Duration::minutes(30));

        assert_eq!(agg.errors_within(Duration::minutes(5), now), 1);
        assert_eq!(agg.errors_within(Duration::hours(1), now), 2);
        assert_eq!(agg.error_rate_within(Duration::minutes(5), now), 100.0);
        assert_eq!(agg.error_rate_within(Duration::seconds(30), now), 0.0);
    }

    #[test]
    fn test_buffers_keep_most_recent() {
        let agg = PerformanceAggregator::new(MetricsConfig {
            buffer_size: 3,
            max_error_samples: 2,
            ..Default::default()
        });
        let now = Utc::now();
        for d in [100, 1, 2, 3] {
            agg.record_transaction_at(TransactionType::Request, d, now);
        }
        for t in ["a", "b", "c"] {
            agg.record_error_at(t, now);
        }
        agg.trim();

        assert_eq!(agg.buffered_counts(), (3, 3, 2));
        let metrics = agg.get_performance_metrics_at(ResourceUsage::default(), now);
        assert_eq!(metrics.response_time.max, 3);
        assert!(!metrics.error_rate.by_type.contains_key("a"));
    }

    #[test]
    fn test_resources_pass_through() {
        let agg = aggregator();
        let resources = ResourceUsage {
            cpu_percent: 12.5,
            memory_percent: 40.0,
            ..Default::default()
        };
        let metrics = agg.get_performance_metrics(resources);
        assert_eq!(metrics.resources, resources);
        assert_eq!(metrics.availability.percentage, 100.0);
    }

    #[test]
    fn test_gauge_names() {
        let names: Vec<&str> = gauges(&PerformanceMetrics::default())
            .iter()
            .map(|(n, _)| *n)
            .collect();
        assert_eq!(
            names,
            vec![
                "requests_per_second",
                "response_time_avg",
                "response_time_p95",
                "error_rate"
            ]
        );
    }
}
