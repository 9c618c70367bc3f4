//! Pipeline metric recording.
//!
//! Every call updates both the `metrics` facade and the in-process store.

use std::sync::Arc;
use std::time::Duration;

use super::store::MetricsStore;

pub const EVENTS_TRACKED: &str = "events_tracked";
pub const EVENTS_FAILED: &str = "events_failed";
pub const EVENTS_REJECTED: &str = "events_rejected";
pub const EVENTS_RATE_LIMITED: &str = "events_rate_limited";
pub const QUERIES: &str = "queries";
pub const EXPORTS: &str = "exports";
pub const TRACK_LATENCY_MS: &str = "track_latency_ms";
pub const QUERY_LATENCY_MS: &str = "query_latency_ms";

#[derive(Clone, Default)]
pub struct PipelineMetrics {
    store: Arc<MetricsStore>,
}

impl PipelineMetrics {
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn tracked(&self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        metrics::counter!("gg_telemetry_events_total", "outcome" => "tracked").increment(1);
        metrics::histogram!("gg_telemetry_track_duration_ms").record(ms);
        self.store.increment_counter(EVENTS_TRACKED, 1);
        self.store.record_histogram(TRACK_LATENCY_MS, ms);
    }

    pub fn failed(&self) {
        metrics::counter!("gg_telemetry_events_total", "outcome" => "failed").increment(1);
        self.store.increment_counter(EVENTS_FAILED, 1);
    }

    pub fn rejected(&self, plugin: &str) {
        metrics::counter!("gg_telemetry_events_total", "outcome" => "rejected").increment(1);
        self.store.increment_counter(EVENTS_REJECTED, 1);
        self.store.increment_counter(&format!("rejected_by.{plugin}"), 1);
    }

    pub fn rate_limited(&self) {
        metrics::counter!("gg_telemetry_events_total", "outcome" => "rate_limited").increment(1);
        self.store.increment_counter(EVENTS_RATE_LIMITED, 1);
    }

    pub fn provider_write(&self, provider: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        metrics::counter!(
            "gg_telemetry_storage_writes_total",
            "provider" => provider.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        self.store
            .increment_counter(&format!("storage.{provider}.{outcome}"), 1);
    }

    pub fn query(&self, results: usize, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        metrics::counter!("gg_telemetry_queries_total").increment(1);
        metrics::histogram!("gg_telemetry_query_duration_ms").record(ms);
        self.store.increment_counter(QUERIES, 1);
        self.store.record_histogram(QUERY_LATENCY_MS, ms);
        self.store.set_gauge("last_query_results", results as f64);
    }

    pub fn exported(&self, format: &str, events: usize) {
        metrics::counter!("gg_telemetry_exports_total", "format" => format.to_string()).increment(1);
        self.store.increment_counter(EXPORTS, 1);
        self.store
            .increment_counter(&format!("exported_events.{format}"), events as u64);
    }

    pub fn gauge(&self, name: &str, value: f64) {
        self.store.set_gauge(name, value);
    }
}
