//! Request counters and latency histogram with Prometheus text exposition.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AdvisorError;

/// Histogram bucket upper bounds in ms. Upstream calls dominate latency, so
/// the buckets reach well past the retry backoff.
const LATENCY_BUCKETS_MS: [u64; 11] = [
    10, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 20000, 60000,
];

const FAILURE_KINDS: [&str; 5] = [
    "configuration",
    "bad_request",
    "payload_too_large",
    "upstream",
    "internal",
];

pub struct Metrics {
    requests_total: AtomicU64,
    recommendations_total: AtomicU64,
    failures_total: [AtomicU64; FAILURE_KINDS.len()],
    hist_counts: [AtomicU64; LATENCY_BUCKETS_MS.len()],
    hist_sum_ms: AtomicU64,
    hist_count: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            recommendations_total: AtomicU64::new(0),
            failures_total: std::array::from_fn(|_| AtomicU64::new(0)),
            hist_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            hist_sum_ms: AtomicU64::new(0),
            hist_count: AtomicU64::new(0),
        }
    }
}

/// Values the registry does not own but exposes alongside its own series.
pub struct ExternalGauges {
    pub upstream_attempts_total: u64,
    pub process_start_epoch: f64,
    pub uptime_secs: f64,
}

impl Metrics {
    pub fn record_success(&self, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.recommendations_total.fetch_add(1, Ordering::Relaxed);
        self.observe_latency(latency_ms);
    }

    pub fn record_failure(&self, err: &AdvisorError, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = FAILURE_KINDS.iter().position(|k| *k == err.kind()) {
            self.failures_total[idx].fetch_add(1, Ordering::Relaxed);
        }
        self.observe_latency(latency_ms);
    }

    /// A request that panicked. Its latency is unknown, so the histogram is
    /// left alone.
    pub fn record_panic(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = FAILURE_KINDS.iter().position(|k| *k == "internal") {
            self.failures_total[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failures_total(&self, kind: &str) -> u64 {
        FAILURE_KINDS
            .iter()
            .position(|k| *k == kind)
            .map(|idx| self.failures_total[idx].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn observe_latency(&self, latency_ms: u64) {
        self.hist_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        // find first bucket >= value
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| latency_ms <= *ub) {
            self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn render(&self, gauges: &ExternalGauges) -> String {
        let mut buf = String::new();
        writeln!(
            &mut buf,
            "# HELP advisor_requests_total Trigger requests handled\n# TYPE advisor_requests_total counter"
        )
        .ok();
        writeln!(&mut buf, "advisor_requests_total {}", self.requests_total()).ok();
        writeln!(
            &mut buf,
            "# HELP advisor_recommendations_total Requests answered with a recommendation\n# TYPE advisor_recommendations_total counter"
        )
        .ok();
        writeln!(
            &mut buf,
            "advisor_recommendations_total {}",
            self.recommendations_total.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP advisor_failures_total Failed requests by error kind\n# TYPE advisor_failures_total counter"
        )
        .ok();
        for (idx, kind) in FAILURE_KINDS.iter().enumerate() {
            writeln!(
                &mut buf,
                "advisor_failures_total{{kind=\"{}\"}} {}",
                kind,
                self.failures_total[idx].load(Ordering::Relaxed)
            )
            .ok();
        }
        writeln!(
            &mut buf,
            "# HELP advisor_upstream_attempts_total Completion calls made, retries included\n# TYPE advisor_upstream_attempts_total counter"
        )
        .ok();
        writeln!(
            &mut buf,
            "advisor_upstream_attempts_total {}",
            gauges.upstream_attempts_total
        )
        .ok();
        // Histogram
        writeln!(
            &mut buf,
            "# HELP advisor_request_latency_ms Trigger request latency histogram milliseconds\n# TYPE advisor_request_latency_ms histogram"
        )
        .ok();
        let mut cumulative: u64 = 0;
        for (i, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.hist_counts[i].load(Ordering::Relaxed);
            writeln!(
                &mut buf,
                "advisor_request_latency_ms_bucket{{le=\"{}\"}} {}",
                ub, cumulative
            )
            .ok();
        }
        let count = self.hist_count.load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "advisor_request_latency_ms_bucket{{le=\"+Inf\"}} {}",
            count
        )
        .ok();
        writeln!(
            &mut buf,
            "advisor_request_latency_ms_sum {}",
            self.hist_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(&mut buf, "advisor_request_latency_ms_count {}", count).ok();
        writeln!(
            &mut buf,
            "# HELP advisor_build_info Build information\n# TYPE advisor_build_info gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "advisor_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP advisor_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE advisor_process_start_time_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "advisor_process_start_time_seconds {}",
            gauges.process_start_epoch
        )
        .ok();
        writeln!(
            &mut buf,
            "# HELP advisor_process_uptime_seconds Process uptime seconds\n# TYPE advisor_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "advisor_process_uptime_seconds {}",
            gauges.uptime_secs
        )
        .ok();
        buf
    }
}
