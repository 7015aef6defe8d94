//! Prometheus metrics for VitalFlow

use chrono::{DateTime, Utc};
use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics collection for the VitalFlow pipeline
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub pointers_total: Counter,
    pub records_total: Counter,
    pub malformed_total: CounterVec,
    pub late_dropped_total: Counter,
    pub windows_fired_total: CounterVec,
    pub windows_evicted_total: CounterVec,
    pub join_emitted_total: CounterVec,
    pub join_forced_evictions: Counter,
    pub enrichment_failures_total: CounterVec,
    pub enrichment_latency: HistogramVec,
    pub watermark_seconds: Gauge,
    pub join_buffer_slots: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let pointers_total = Counter::new("vitalflow_pointers_total", "Pointer messages received")
            .expect("failed to create pointers_total counter");

        let records_total = Counter::new("vitalflow_records_total", "Biometric records decoded")
            .expect("failed to create records_total counter");

        let malformed_total = CounterVec::new(
            Opts::new("vitalflow_malformed_total", "Undecodable inputs skipped"),
            &["kind"],
        )
        .expect("failed to create malformed_total counter");

        let late_dropped_total = Counter::new(
            "vitalflow_late_dropped_total",
            "Records dropped beyond allowed lateness",
        )
        .expect("failed to create late_dropped_total counter");

        let windows_fired_total = CounterVec::new(
            Opts::new("vitalflow_windows_fired_total", "Window firings by stream"),
            &["stream"],
        )
        .expect("failed to create windows_fired_total counter");

        let windows_evicted_total = CounterVec::new(
            Opts::new("vitalflow_windows_evicted_total", "Window evictions by stream"),
            &["stream"],
        )
        .expect("failed to create windows_evicted_total counter");

        let join_emitted_total = CounterVec::new(
            Opts::new("vitalflow_join_emitted_total", "Joined slots emitted"),
            &["mode"],
        )
        .expect("failed to create join_emitted_total counter");

        let join_forced_evictions = Counter::new(
            "vitalflow_join_forced_evictions_total",
            "Join slots force-closed at capacity",
        )
        .expect("failed to create join_forced_evictions counter");

        let enrichment_failures_total = CounterVec::new(
            Opts::new(
                "vitalflow_enrichment_failures_total",
                "Recommendation calls that failed",
            ),
            &["reason"],
        )
        .expect("failed to create enrichment_failures_total counter");

        let enrichment_latency = HistogramVec::new(
            HistogramOpts::new(
                "vitalflow_enrichment_latency_seconds",
                "Recommendation call latency",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["recommender"],
        )
        .expect("failed to create enrichment_latency histogram");

        let watermark_seconds = Gauge::new(
            "vitalflow_watermark_seconds",
            "Current event-time watermark (unix seconds)",
        )
        .expect("failed to create watermark_seconds gauge");

        let join_buffer_slots = Gauge::new(
            "vitalflow_join_buffer_slots",
            "Output slots buffered in the joiner",
        )
        .expect("failed to create join_buffer_slots gauge");

        registry
            .register(Box::new(pointers_total.clone()))
            .expect("failed to register pointers_total");
        registry
            .register(Box::new(records_total.clone()))
            .expect("failed to register records_total");
        registry
            .register(Box::new(malformed_total.clone()))
            .expect("failed to register malformed_total");
        registry
            .register(Box::new(late_dropped_total.clone()))
            .expect("failed to register late_dropped_total");
        registry
            .register(Box::new(windows_fired_total.clone()))
            .expect("failed to register windows_fired_total");
        registry
            .register(Box::new(windows_evicted_total.clone()))
            .expect("failed to register windows_evicted_total");
        registry
            .register(Box::new(join_emitted_total.clone()))
            .expect("failed to register join_emitted_total");
        registry
            .register(Box::new(join_forced_evictions.clone()))
            .expect("failed to register join_forced_evictions");
        registry
            .register(Box::new(enrichment_failures_total.clone()))
            .expect("failed to register enrichment_failures_total");
        registry
            .register(Box::new(enrichment_latency.clone()))
            .expect("failed to register enrichment_latency");
        registry
            .register(Box::new(watermark_seconds.clone()))
            .expect("failed to register watermark_seconds");
        registry
            .register(Box::new(join_buffer_slots.clone()))
            .expect("failed to register join_buffer_slots");

        Self {
            registry: Arc::new(registry),
            pointers_total,
            records_total,
            malformed_total,
            late_dropped_total,
            windows_fired_total,
            windows_evicted_total,
            join_emitted_total,
            join_forced_evictions,
            enrichment_failures_total,
            enrichment_latency,
            watermark_seconds,
            join_buffer_slots,
        }
    }

    /// Record an incoming pointer message
    pub fn record_pointer(&self) {
        self.pointers_total.inc();
    }

    /// Record decoded biometric records
    pub fn record_records(&self, count: u64) {
        self.records_total.inc_by(count as f64);
    }

    /// Record a skipped undecodable input
    pub fn record_malformed(&self, kind: &str, count: u64) {
        self.malformed_total
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }

    /// Record a record dropped beyond allowed lateness
    pub fn record_late_drop(&self) {
        self.late_dropped_total.inc();
    }

    /// Record window firings for a stream
    pub fn record_fired(&self, stream: &str, count: u64) {
        self.windows_fired_total
            .with_label_values(&[stream])
            .inc_by(count as f64);
    }

    /// Record window evictions for a stream
    pub fn record_evicted(&self, stream: &str, count: u64) {
        self.windows_evicted_total
            .with_label_values(&[stream])
            .inc_by(count as f64);
    }

    /// Record an emitted join result
    pub fn record_join_emit(&self, partial: bool) {
        let mode = if partial { "partial" } else { "complete" };
        self.join_emitted_total.with_label_values(&[mode]).inc();
    }

    /// Record a join slot force-closed at capacity
    pub fn record_forced_eviction(&self) {
        self.join_forced_evictions.inc();
    }

    /// Record a completed recommendation call
    pub fn record_enrichment(&self, recommender: &str, latency_secs: f64) {
        self.enrichment_latency
            .with_label_values(&[recommender])
            .observe(latency_secs);
    }

    /// Record a failed recommendation call
    pub fn record_enrichment_failure(&self, reason: &str) {
        self.enrichment_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Set the current watermark gauge
    pub fn set_watermark(&self, watermark: DateTime<Utc>) {
        self.watermark_seconds.set(watermark.timestamp() as f64);
    }

    /// Set the join buffer occupancy gauge
    pub fn set_join_buffer(&self, slots: usize) {
        self.join_buffer_slots.set(slots as f64);
    }

    /// Get Prometheus text output
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP server for Prometheus metrics endpoint
pub struct MetricsServer {
    metrics: Metrics,
    addr: String,
}

impl MetricsServer {
    pub fn new(metrics: Metrics, addr: impl Into<String>) -> Self {
        Self {
            metrics,
            addr: addr.into(),
        }
    }

    /// Run the metrics HTTP server
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("Metrics server listening on http://{}/metrics", self.addr);

        loop {
            let (mut socket, _addr) = listener.accept().await?;

            let metrics_output = self.metrics.gather();

            // Simple HTTP response
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                metrics_output.len(),
                metrics_output
            );

            if let Err(e) = socket.write_all(response.as_bytes()).await {
                error!("Failed to write response: {}", e);
            }
        }
    }
}
