//! Request metrics and statistics tracking for the classifier service.

use crate::types::label::WasteClass;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for service performance
pub struct ServiceMetrics {
    /// Successful predictions
    pub predictions_served: AtomicU64,
    /// History listings served
    pub history_requests: AtomicU64,
    /// Failed requests by error kind
    failures_by_kind: RwLock<HashMap<&'static str, u64>>,
    /// Predictions by label
    predictions_by_label: RwLock<HashMap<WasteClass, u64>>,
    /// End-to-end request times (in microseconds)
    request_times: RwLock<Vec<u64>>,
    /// Model inference times (in microseconds)
    inference_times: RwLock<Vec<u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ServiceMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            history_requests: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            predictions_by_label: RwLock::new(HashMap::new()),
            request_times: RwLock::new(Vec::with_capacity(1000)),
            inference_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a successful prediction
    pub fn record_prediction(
        &self,
        label: WasteClass,
        request_time: Duration,
        inference_time: Duration,
    ) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_label) = self.predictions_by_label.write() {
            *by_label.entry(label).or_insert(0) += 1;
        }

        push_bounded(&self.request_times, request_time, 10000);
        push_bounded(&self.inference_times, inference_time, 10000);
    }

    /// Record a served history listing
    pub fn record_history(&self) {
        self.history_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed request
    pub fn record_failure(&self, kind: &'static str) {
        if let Ok(mut by_kind) = self.failures_by_kind.write() {
            *by_kind.entry(kind).or_insert(0) += 1;
        }
    }

    /// Get request time statistics
    pub fn get_request_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(&self.request_times)
    }

    /// Get inference time statistics
    pub fn get_inference_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(&self.inference_times)
    }

    /// Total failed requests
    pub fn failure_count(&self) -> u64 {
        self.get_failures_by_kind().values().sum()
    }

    /// Get failures by error kind
    pub fn get_failures_by_kind(&self) -> HashMap<&'static str, u64> {
        self.failures_by_kind
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Get predictions by label
    pub fn get_predictions_by_label(&self) -> HashMap<WasteClass, u64> {
        self.predictions_by_label
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Get current throughput (predictions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_served.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let served = self.predictions_served.load(Ordering::Relaxed);
        let history = self.history_requests.load(Ordering::Relaxed);
        let failures = self.failure_count();
        let request = self.get_request_stats();
        let inference = self.get_inference_stats();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            WASTE CLASSIFIER SERVICE - METRICS SUMMARY        ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions Served: {:>8}  │  Throughput: {:>6.2} req/s    ║",
            served,
            self.get_throughput()
        );
        info!(
            "║ History Requests:   {:>8}  │  Failures:   {:>8}        ║",
            history, failures
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Request Time (μs):   mean={:>6} p50={:>6} p95={:>6} p99={:>6} ║",
            request.mean_us, request.p50_us, request.p95_us, request.p99_us
        );
        info!(
            "║ Inference Time (μs): mean={:>6} p50={:>6} p95={:>6} p99={:>6} ║",
            inference.mean_us, inference.p50_us, inference.p95_us, inference.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Predictions by Label:                                        ║");
        let by_label = self.get_predictions_by_label();
        for class in WasteClass::ALL {
            let count = by_label.get(&class).copied().unwrap_or(0);
            if count == 0 {
                continue;
            }
            let pct = (count as f64 / served.max(1) as f64) * 100.0;
            let bar: String = "█".repeat(((pct / 5.0) as usize).min(20));
            info!("║   {:12}: {:>6} ({:>5.1}%) {}", class.as_str(), count, pct, bar);
        }
        let failures_by_kind = self.get_failures_by_kind();
        if !failures_by_kind.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Failures by Kind:                                            ║");
            for (kind, count) in &failures_by_kind {
                info!("║   {:10}: {:>6}", kind, count);
            }
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(samples: &RwLock<Vec<u64>>, duration: Duration, cap: usize) {
    if let Ok(mut times) = samples.write() {
        times.push(duration.as_micros() as u64);
        // Keep only the most recent samples
        if times.len() > cap {
            times.drain(0..cap / 2);
        }
    }
}

/// Latency statistics
#[derive(Debug, Default, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl LatencyStats {
    fn from_samples(samples: &RwLock<Vec<u64>>) -> Self {
        let mut sorted = match samples.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return Self::default(),
        };
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        Self {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: std::sync::Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: std::sync::Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
